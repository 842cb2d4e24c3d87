//! Tests for error classification and status mapping.

use ferry::TransferError;
use ferry::error::from_status;
use tonic::{Code, Status};

fn all_errors() -> Vec<TransferError> {
    vec![
        TransferError::NotFound("a.txt".into()),
        TransferError::StoreUnavailable("disk gone".into()),
        TransferError::InvalidName("../a".into()),
        TransferError::Unauthenticated("token is invalid".into()),
        TransferError::DeadlineExceeded,
        TransferError::Canceled,
        TransferError::Transport("reset".into()),
        TransferError::Configuration("bad toml".into()),
    ]
}

#[test]
fn status_codes_follow_error_kind() {
    let codes: Vec<Code> = all_errors()
        .into_iter()
        .map(|e| Status::from(e).code())
        .collect();
    assert_eq!(
        codes,
        vec![
            Code::NotFound,
            Code::Unavailable,
            Code::InvalidArgument,
            Code::Unauthenticated,
            Code::DeadlineExceeded,
            Code::Cancelled,
            Code::Internal,
            Code::Internal,
        ]
    );
}

#[test]
fn client_side_mapping_preserves_actionable_kinds() {
    for err in all_errors() {
        let back = from_status(err.clone().into());
        match err {
            // Both collapse to Internal on the wire.
            TransferError::Transport(_) | TransferError::Configuration(_) => {
                assert!(matches!(back, TransferError::Transport(_)), "{back:?}");
            }
            _ => assert_eq!(back.kind(), err.kind()),
        }
    }
}

#[test]
fn unknown_codes_become_transport_errors() {
    let err = from_status(Status::resource_exhausted("too many calls"));
    assert!(matches!(err, TransferError::Transport(ref m) if m == "too many calls"));
    assert!(err.is_retryable());
}

#[test]
fn only_infrastructure_failures_are_retryable() {
    let retryable: Vec<&str> = all_errors()
        .iter()
        .filter(|e| e.is_retryable())
        .map(TransferError::kind)
        .collect();
    assert_eq!(retryable, vec!["store_unavailable", "transport"]);
}

#[test]
fn status_message_carries_error_text() {
    let status = Status::from(TransferError::NotFound("a.txt".into()));
    assert_eq!(status.message(), "file not found: a.txt");
}

#[test]
fn server_message_is_not_wrapped_twice() {
    let err = from_status(TransferError::NotFound("missing.txt".into()).into());
    assert!(matches!(err, TransferError::NotFound(ref name) if name == "missing.txt"));
    assert_eq!(err.to_string(), "file not found: missing.txt");

    let err = from_status(TransferError::Unauthenticated("token is invalid".into()).into());
    assert_eq!(err.to_string(), "unauthenticated: token is invalid");

    let err = from_status(TransferError::Transport("reset".into()).into());
    assert_eq!(err.to_string(), "transport error: reset");
}
