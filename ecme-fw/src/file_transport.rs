// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The side channel firmware images travel over.
//!
//! Controllers pull uploads from (and push downloads to) a simple file
//! service keyed by file name. Which address the controller should use to
//! reach that service may depend on which network the controller sits on, so
//! it is resolved per peer.

use crate::error::FileTransportError;
use async_trait::async_trait;
use lru_cache::LruCache;
use slog::warn;
use slog::Logger;
use std::net::IpAddr;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

#[async_trait]
pub trait FileTransport: Send + Sync + 'static {
    /// Address at which `peer` can reach this file service.
    async fn advertised_addr(
        &self,
        peer: IpAddr,
    ) -> Result<SocketAddr, FileTransportError>;

    /// Publish `data` under `name`, returning the name a controller should
    /// request it by.
    async fn send(
        &self,
        name: &str,
        data: Vec<u8>,
    ) -> Result<String, FileTransportError>;

    /// Fetch the contents of `name`.
    async fn receive(&self, name: &str) -> Result<Vec<u8>, FileTransportError>;

    /// Delete `name`. Removing a file that isn't there is not an error.
    async fn remove(&self, name: &str) -> Result<(), FileTransportError>;
}

#[async_trait]
impl<T: FileTransport> FileTransport for Arc<T> {
    async fn advertised_addr(
        &self,
        peer: IpAddr,
    ) -> Result<SocketAddr, FileTransportError> {
        (**self).advertised_addr(peer).await
    }

    async fn send(
        &self,
        name: &str,
        data: Vec<u8>,
    ) -> Result<String, FileTransportError> {
        (**self).send(name, data).await
    }

    async fn receive(&self, name: &str) -> Result<Vec<u8>, FileTransportError> {
        (**self).receive(name).await
    }

    async fn remove(&self, name: &str) -> Result<(), FileTransportError> {
        (**self).remove(name).await
    }
}

/// Remove a transfer file we're done with, logging any failure.
pub(crate) async fn discard(
    transport: &dyn FileTransport,
    name: &str,
    log: &Logger,
) {
    if let Err(err) = transport.remove(name).await {
        warn!(
            log, "failed to remove transfer file";
            "filename" => name,
            &err,
        );
    }
}

/// A file service whose contents live in memory.
///
/// Whatever serves these files to controllers (or a simulated controller in
/// tests) uses [`InMemoryFileTransport::insert`] and
/// [`InMemoryFileTransport::get`] for its side of the exchange. The oldest
/// files are evicted once `capacity` is reached.
pub struct InMemoryFileTransport {
    addr: SocketAddr,
    files: Mutex<LruCache<String, Vec<u8>>>,
}

impl InMemoryFileTransport {
    pub fn with_capacity(addr: SocketAddr, capacity: usize) -> Self {
        Self { addr, files: Mutex::new(LruCache::new(capacity)) }
    }

    pub async fn insert(&self, name: impl Into<String>, data: Vec<u8>) {
        let mut files = self.files.lock().await;
        files.insert(name.into(), data);
    }

    pub async fn get(&self, name: &str) -> Option<Vec<u8>> {
        let mut files = self.files.lock().await;
        files.get_mut(name).map(|data| data.clone())
    }

    pub async fn len(&self) -> usize {
        self.files.lock().await.len()
    }
}

#[async_trait]
impl FileTransport for InMemoryFileTransport {
    async fn advertised_addr(
        &self,
        _peer: IpAddr,
    ) -> Result<SocketAddr, FileTransportError> {
        Ok(self.addr)
    }

    async fn send(
        &self,
        name: &str,
        data: Vec<u8>,
    ) -> Result<String, FileTransportError> {
        self.insert(name, data).await;
        Ok(name.to_string())
    }

    async fn receive(&self, name: &str) -> Result<Vec<u8>, FileTransportError> {
        self.get(name).await.ok_or_else(|| FileTransportError::NoSuchFile {
            name: name.to_string(),
        })
    }

    async fn remove(&self, name: &str) -> Result<(), FileTransportError> {
        self.files.lock().await.remove(name);
        Ok(())
    }
}

/// The root directory of a file service run by someone else (e.g., a TFTP
/// server) that listens on `addr`.
pub struct DirectoryFileTransport {
    root: PathBuf,
    addr: SocketAddr,
}

impl DirectoryFileTransport {
    pub fn new(root: impl Into<PathBuf>, addr: SocketAddr) -> Self {
        Self { root: root.into(), addr }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

#[async_trait]
impl FileTransport for DirectoryFileTransport {
    async fn advertised_addr(
        &self,
        peer: IpAddr,
    ) -> Result<SocketAddr, FileTransportError> {
        // An unspecified listen address is reachable from anywhere, but we
        // can't tell a controller to connect to it.
        if self.addr.ip().is_unspecified() {
            return Err(FileTransportError::NoRoute { peer });
        }
        Ok(self.addr)
    }

    async fn send(
        &self,
        name: &str,
        data: Vec<u8>,
    ) -> Result<String, FileTransportError> {
        tokio::fs::write(self.path(name), data).await.map_err(|err| {
            FileTransportError::Io { name: name.to_string(), err }
        })?;
        Ok(name.to_string())
    }

    async fn receive(&self, name: &str) -> Result<Vec<u8>, FileTransportError> {
        match tokio::fs::read(self.path(name)).await {
            Ok(data) => Ok(data),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(FileTransportError::NoSuchFile { name: name.to_string() })
            }
            Err(err) => {
                Err(FileTransportError::Io { name: name.to_string(), err })
            }
        }
    }

    async fn remove(&self, name: &str) -> Result<(), FileTransportError> {
        match tokio::fs::remove_file(self.path(name)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(FileTransportError::Io { name: name.to_string(), err })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use std::net::Ipv4Addr;

    fn addr() -> SocketAddr {
        "192.168.100.1:69".parse().unwrap()
    }

    #[tokio::test]
    async fn in_memory_round_trip_and_eviction() {
        let transport = InMemoryFileTransport::with_capacity(addr(), 2);
        let peer = IpAddr::V4(Ipv4Addr::new(192, 168, 100, 2));
        assert_eq!(transport.advertised_addr(peer).await.unwrap(), addr());

        let name = transport.send("a.bin", vec![1, 2, 3]).await.unwrap();
        assert_eq!(name, "a.bin");
        transport.send("b.bin", vec![4]).await.unwrap();
        transport.send("c.bin", vec![5]).await.unwrap();

        assert_eq!(transport.len().await, 2);
        let v = transport.receive("a.bin").await;
        let Err(FileTransportError::NoSuchFile { name }) = v else {
            panic!("mismatched value {v:?}");
        };
        assert_eq!(name, "a.bin");
        assert_eq!(transport.receive("c.bin").await.unwrap(), vec![5]);

        transport.remove("c.bin").await.unwrap();
        transport.remove("c.bin").await.unwrap();
        assert_eq!(transport.len().await, 1);
        assert!(transport.get("c.bin").await.is_none());
    }

    #[tokio::test]
    async fn directory_transport() {
        let dir = Utf8TempDir::new().unwrap();
        let root = dir.path();

        let transport =
            DirectoryFileTransport::new(root.as_std_path(), addr());
        transport.send("image.bin", vec![0xaa; 16]).await.unwrap();
        assert_eq!(
            tokio::fs::read(root.join("image.bin")).await.unwrap(),
            vec![0xaa; 16]
        );
        assert_eq!(
            transport.receive("image.bin").await.unwrap(),
            vec![0xaa; 16]
        );
        let v = transport.receive("missing.bin").await;
        assert!(
            matches!(v, Err(FileTransportError::NoSuchFile { .. })),
            "mismatched value {v:?}"
        );

        transport.remove("image.bin").await.unwrap();
        assert!(!root.join("image.bin").exists());
        transport.remove("missing.bin").await.unwrap();

        let unspecified = DirectoryFileTransport::new(
            root.as_std_path(),
            "0.0.0.0:69".parse().unwrap(),
        );
        let peer = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7));
        let v = unspecified.advertised_addr(peer).await;
        assert!(
            matches!(v, Err(FileTransportError::NoRoute { .. })),
            "mismatched value {v:?}"
        );
    }
}
