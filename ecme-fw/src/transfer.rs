// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Moving one image into or out of one partition.

use crate::config::NodeConfig;
use crate::controller::Controller;
use crate::error::TransferError;
use crate::file_transport::discard;
use crate::file_transport::FileTransport;
use crate::image::Image;
use crate::image::ImageFormat;
use crate::partition::Partition;
use crate::response_expect::expect_activate_firmware_ack;
use crate::response_expect::expect_firmware_check;
use crate::response_expect::expect_firmware_status;
use crate::response_expect::expect_firmware_transfer_started;
use ecme_messages::ControllerRequest;
use ecme_messages::ImageType;
use ecme_messages::TransferHandle;
use ecme_messages::TransferStatus;
use slog::debug;
use slog::error;
use slog::info;
use slog::Logger;
use std::net::IpAddr;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransferDirection {
    Upload,
    Download,
}

/// Where a transfer stands. A transfer only exists once the controller has
/// accepted it, so there is no state before `InProgress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransferState {
    InProgress,
    Complete,
    Failed,
}

#[derive(Debug)]
pub(crate) struct Transfer {
    handle: TransferHandle,
    /// Name of the image on the file transport.
    filename: String,
    partition: u8,
    image_type: ImageType,
    direction: TransferDirection,
    state: TransferState,
}

/// Drives transfers for one node.
pub(crate) struct TransferSession<'a> {
    pub(crate) controller: &'a Controller,
    pub(crate) transport: &'a dyn FileTransport,
    pub(crate) image_format: &'a dyn ImageFormat,
    pub(crate) config: &'a NodeConfig,
    pub(crate) log: &'a Logger,
}

impl TransferSession<'_> {
    /// Write `image` to `partition`, check it, and activate it.
    ///
    /// Without a `priority` the partition keeps its current one. The image
    /// file is removed from the transport once the transfer is over.
    pub(crate) async fn upload(
        &self,
        image: &Image,
        partition: &Partition,
        priority: Option<u16>,
    ) -> Result<(), TransferError> {
        let mut transfer =
            self.start_upload(image, partition, priority).await?;
        let terminal = self.await_terminal(&mut transfer).await;
        discard(self.transport, &transfer.filename, self.log).await;
        terminal?;
        self.verify_and_activate(&transfer).await?;
        info!(
            self.log, "image written and activated";
            "partition" => partition.index,
            "image_type" => %partition.image_type,
        );
        Ok(())
    }

    /// Read back the image stored in `partition`.
    pub(crate) async fn download(
        &self,
        partition: &Partition,
    ) -> Result<Image, TransferError> {
        let mut transfer = self.start_download(partition).await?;
        let received = match self.await_terminal(&mut transfer).await {
            Ok(()) => self
                .transport
                .receive(&transfer.filename)
                .await
                .map_err(TransferError::from),
            Err(err) => Err(err),
        };
        discard(self.transport, &transfer.filename, self.log).await;
        let data = received?;
        let payload = self.image_format.decode(&data).map_err(|err| {
            TransferError::ImageFormat { partition: partition.index, err }
        })?;
        Ok(Image::new(partition.image_type, payload)
            .with_load_address(partition.load_address)
            .with_version(partition.version.to_string()))
    }

    pub(crate) async fn start_upload(
        &self,
        image: &Image,
        partition: &Partition,
        priority: Option<u16>,
    ) -> Result<Transfer, TransferError> {
        let priority = priority.unwrap_or(partition.priority);
        let load_address =
            image.load_address().unwrap_or(partition.load_address);
        let data = self
            .image_format
            .encode(image, priority, load_address)
            .map_err(|err| TransferError::ImageFormat {
                partition: partition.index,
                err,
            })?;

        if data.len() as u64 > u64::from(partition.size_limit) {
            return Err(TransferError::ImageTooLarge {
                image_type: image.image_type(),
                partition: partition.index,
                size: data.len() as u64,
                limit: partition.size_limit,
            });
        }

        let node = self.controller.address();
        let transport_addr = self.transport.advertised_addr(node).await?;
        let filename =
            self.transport.send(&transfer_filename(node), data).await?;

        let started = self
            .controller
            .rpc(ControllerRequest::UpdateFirmware {
                filename: filename.clone(),
                partition: partition.index,
                image_type: image.image_type(),
                transport_addr,
            })
            .await
            .and_then(|r| {
                expect_firmware_transfer_started("update_firmware", r)
            });
        let handle = match started {
            Ok(handle) => handle,
            Err(err) => {
                discard(self.transport, &filename, self.log).await;
                return Err(err.into());
            }
        };

        info!(
            self.log, "started firmware upload";
            "handle" => %handle,
            "partition" => partition.index,
            "image_type" => %image.image_type(),
            "priority" => priority,
        );

        Ok(Transfer {
            handle,
            filename,
            partition: partition.index,
            image_type: image.image_type(),
            direction: TransferDirection::Upload,
            state: TransferState::InProgress,
        })
    }

    pub(crate) async fn start_download(
        &self,
        partition: &Partition,
    ) -> Result<Transfer, TransferError> {
        let node = self.controller.address();
        let transport_addr = self.transport.advertised_addr(node).await?;
        let filename = transfer_filename(node);

        let handle = self
            .controller
            .rpc(ControllerRequest::RetrieveFirmware {
                filename: filename.clone(),
                partition: partition.index,
                image_type: partition.image_type,
                transport_addr,
            })
            .await
            .and_then(|r| {
                expect_firmware_transfer_started("retrieve_firmware", r)
            })?;

        info!(
            self.log, "started firmware download";
            "handle" => %handle,
            "partition" => partition.index,
            "image_type" => %partition.image_type,
        );

        Ok(Transfer {
            handle,
            filename,
            partition: partition.index,
            image_type: partition.image_type,
            direction: TransferDirection::Download,
            state: TransferState::InProgress,
        })
    }

    /// Poll until `transfer` leaves `InProgress`, failing if it takes longer
    /// than the configured timeout or ends in anything but `Complete`.
    ///
    /// Failures to get a status are not retried.
    pub(crate) async fn await_terminal(
        &self,
        transfer: &mut Transfer,
    ) -> Result<(), TransferError> {
        let start = Instant::now();
        loop {
            let status = self
                .controller
                .rpc(ControllerRequest::GetFirmwareStatus(transfer.handle))
                .await
                .and_then(expect_firmware_status)?;

            match status {
                TransferStatus::InProgress => {
                    let elapsed = start.elapsed();
                    if elapsed >= self.config.transfer_timeout {
                        error!(
                            self.log, "firmware transfer timed out";
                            "handle" => %transfer.handle,
                            "elapsed" => ?elapsed,
                        );
                        transfer.state = TransferState::Failed;
                        return Err(TransferError::Timeout {
                            handle: transfer.handle,
                            elapsed,
                        });
                    }
                    debug!(
                        self.log,
                        "transfer in progress; sleeping for {:?}",
                        self.config.transfer_poll_interval;
                        "handle" => %transfer.handle,
                    );
                    tokio::time::sleep(self.config.transfer_poll_interval)
                        .await;
                }
                TransferStatus::Complete => {
                    debug!(
                        self.log, "firmware transfer complete";
                        "handle" => %transfer.handle,
                        "direction" => ?transfer.direction,
                        "filename" => &transfer.filename,
                    );
                    transfer.state = TransferState::Complete;
                    return Ok(());
                }
                TransferStatus::Failed(status) => {
                    error!(
                        self.log, "node reported transfer failure";
                        "handle" => %transfer.handle,
                        "status" => &status,
                    );
                    transfer.state = TransferState::Failed;
                    return Err(TransferError::Failure {
                        handle: transfer.handle,
                        status,
                    });
                }
            }
        }
    }

    /// Have the controller check the crc32 of an uploaded image and, if it
    /// passes, activate the partition.
    pub(crate) async fn verify_and_activate(
        &self,
        transfer: &Transfer,
    ) -> Result<(), TransferError> {
        if transfer.state != TransferState::Complete {
            return Err(TransferError::NotComplete { handle: transfer.handle });
        }
        let partition = transfer.partition;

        let check = self
            .controller
            .rpc(ControllerRequest::CheckFirmware { partition })
            .await
            .and_then(expect_firmware_check)?;
        if check.crc32.is_none() || check.error.is_some() {
            error!(
                self.log, "node reported crc32 check failure";
                "partition" => partition,
                "image_type" => %transfer.image_type,
                "error" => ?check.error,
            );
            return Err(TransferError::CrcCheckFailure {
                partition,
                reason: check.error,
            });
        }

        self.controller
            .rpc(ControllerRequest::ActivateFirmware { partition })
            .await
            .and_then(expect_activate_firmware_ack)?;
        Ok(())
    }
}

/// Name a transfer file so that concurrent transfers for many nodes can share
/// one file transport.
fn transfer_filename(node: IpAddr) -> String {
    format!("{node}-{}.bin", Uuid::new_v4())
}
