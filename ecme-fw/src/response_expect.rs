// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::CommunicationError;
use ecme_messages::ChassisStatus;
use ecme_messages::ControllerResponse;
use ecme_messages::FirmwareCheck;
use ecme_messages::FirmwareInfoEntry;
use ecme_messages::InfoBasic;
use ecme_messages::InfoCard;
use ecme_messages::SensorReading;
use ecme_messages::TransferHandle;
use ecme_messages::TransferStatus;
use paste::paste;

type Result<T> = std::result::Result<T, CommunicationError>;

fn unexpected(
    expected: &'static str,
    response: ControllerResponse,
) -> CommunicationError {
    match response {
        ControllerResponse::Error(err) => {
            CommunicationError::ControllerError(err)
        }
        other => {
            CommunicationError::BadResponseType { expected, got: other.into() }
        }
    }
}

/// Macro to generate an `expect_*` function for the given
/// [`ControllerResponse`]
macro_rules! expect_fn {
    ($name:ident) => {
        paste! {
            #[allow(unused)]
            pub(crate) fn [< expect_ $name:snake:lower >](
                r: ControllerResponse,
            ) -> Result<()> {
                match r {
                    ControllerResponse::$name => Ok(()),
                    other => Err(unexpected(
                        stringify!([< $name:snake:lower >]),
                        other,
                    )),
                }
            }
        }
    };
    ($name:ident($arg:ident) -> $out_type:ty) => {
        paste! {
            #[allow(unused)]
            pub(crate) fn [< expect_ $name:snake:lower >](
                r: ControllerResponse,
            ) -> Result<$out_type> {
                match r {
                    ControllerResponse::$name($arg) => Ok($arg),
                    other => Err(unexpected(
                        stringify!([< $name:snake:lower >]),
                        other,
                    )),
                }
            }
        }
    };
}

expect_fn!(ChassisStatus(status) -> ChassisStatus);
expect_fn!(SetChassisPowerAck);
expect_fn!(SetChassisPolicyAck);
expect_fn!(McResetAck);
expect_fn!(SdrList(sensors) -> Vec<SensorReading>);
expect_fn!(FirmwareInfo(entries) -> Vec<FirmwareInfoEntry>);
expect_fn!(FirmwareCheck(check) -> FirmwareCheck);
expect_fn!(ActivateFirmwareAck);
expect_fn!(ResetFirmwareAck);
expect_fn!(SelClearAck);
expect_fn!(SetFirmwareVersionAck);
expect_fn!(FabricInfoAck);
expect_fn!(InfoBasic(info) -> InfoBasic);
expect_fn!(InfoCard(card) -> InfoCard);

/// Decode the reply to `UpdateFirmware` / `RetrieveFirmware`; a reply
/// without a handle means the controller refused to start the transfer.
pub(crate) fn expect_firmware_transfer_started(
    operation: &'static str,
    r: ControllerResponse,
) -> Result<TransferHandle> {
    match r {
        ControllerResponse::FirmwareTransferStarted { handle: Some(h) } => {
            Ok(h)
        }
        ControllerResponse::FirmwareTransferStarted { handle: None } => {
            Err(CommunicationError::ResponseShape {
                operation,
                field: "handle",
            })
        }
        other => Err(unexpected("firmware_transfer_started", other)),
    }
}

pub(crate) fn expect_firmware_status(
    r: ControllerResponse,
) -> Result<TransferStatus> {
    match r {
        ControllerResponse::FirmwareStatus { status: Some(status) } => {
            Ok(status)
        }
        ControllerResponse::FirmwareStatus { status: None } => {
            Err(CommunicationError::ResponseShape {
                operation: "get_firmware_status",
                field: "status",
            })
        }
        other => Err(unexpected("firmware_status", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecme_messages::ControllerError;

    #[test]
    fn test_expect() {
        let v = expect_activate_firmware_ack(ControllerResponse::SelClearAck);
        assert!(
            matches!(
                v,
                Err(CommunicationError::BadResponseType {
                    expected: "activate_firmware_ack",
                    got: "sel_clear_ack",
                })
            ),
            "mismatched value {v:?}"
        );

        let v = expect_mc_reset_ack(ControllerResponse::Error(
            ControllerError { completion_code: 0xc1, message: "nope".into() },
        ));
        let Err(CommunicationError::ControllerError(err)) = v else {
            panic!("mismatched value {v:?}");
        };
        assert_eq!(err.completion_code, 0xc1);
    }

    #[test]
    fn test_transfer_started_requires_handle() {
        let v = expect_firmware_transfer_started(
            "update_firmware",
            ControllerResponse::FirmwareTransferStarted {
                handle: Some(TransferHandle(7)),
            },
        );
        assert_eq!(v.unwrap(), TransferHandle(7));

        let v = expect_firmware_transfer_started(
            "retrieve_firmware",
            ControllerResponse::FirmwareTransferStarted { handle: None },
        );
        assert!(
            matches!(
                v,
                Err(CommunicationError::ResponseShape {
                    operation: "retrieve_firmware",
                    field: "handle",
                })
            ),
            "mismatched value {v:?}"
        );
    }

    #[test]
    fn test_status_requires_status() {
        let v = expect_firmware_status(ControllerResponse::FirmwareStatus {
            status: None,
        });
        assert!(
            matches!(
                v,
                Err(CommunicationError::ResponseShape { field: "status", .. })
            ),
            "mismatched value {v:?}"
        );

        let v = expect_firmware_status(ControllerResponse::FirmwareStatus {
            status: Some(TransferStatus::Complete),
        });
        assert_eq!(v.unwrap(), TransferStatus::Complete);
    }
}
