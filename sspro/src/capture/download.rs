use std::time::Duration;

use bytes::BytesMut;
use log::debug;

use super::{Transport, ENDPOINT_DATA_IN};
use crate::error::{Error, Result};

pub const CHUNK_SIZE: usize = 1024;

// 2034 rows * 6220 bytes plus slack
pub const MAX_TRANSFER_SIZE: usize = 12_677_612;

/// Reads an image download off the data pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Downloader {
    pub endpoint: u8,
    pub chunk_size: usize,
    pub max_size: usize,
    pub timeout: Duration,
}

impl Downloader {
    pub fn new(timeout: Duration) -> Self {
        Self {
            endpoint: ENDPOINT_DATA_IN,
            chunk_size: CHUNK_SIZE,
            max_size: MAX_TRANSFER_SIZE,
            timeout,
        }
    }

    /// Read chunks until one comes back short or `max_size` bytes are in.
    ///
    /// A transport error drops everything read so far.
    pub fn download_all<T: Transport + ?Sized>(&self, transport: &T) -> Result<BytesMut> {
        let mut buffer = BytesMut::with_capacity(self.max_size);
        let mut chunk = vec![0u8; self.chunk_size];

        loop {
            let wanted = self.chunk_size.min(self.max_size - buffer.len());
            let len = transport
                .read_bulk(self.endpoint, &mut chunk[..wanted], self.timeout)
                .map_err(Error::TransportRead)?
                .min(wanted);

            buffer.extend_from_slice(&chunk[..len]);

            if len < self.chunk_size || buffer.len() >= self.max_size {
                break;
            }
        }

        debug!("Downloaded {} bytes", buffer.len());
        Ok(buffer)
    }
}
