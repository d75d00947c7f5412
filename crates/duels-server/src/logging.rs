use crate::{
    connection_registry::ConnId,
    error::{ErrorKind, ServiceError},
};
use duels_protocol::model::UserId;
use tracing::{debug, error};

/// Frame metadata only. Payloads carry code and test results and never reach the log.
pub fn log_inbound_event(conn_id: ConnId, user_id: UserId, event_type: &str, payload_bytes: usize) {
    debug!(
        %conn_id,
        user_id,
        event_type,
        payload_bytes,
        "connection.event_received"
    );
}

pub fn log_invalid_json(conn_id: ConnId, user_id: UserId, payload_bytes: usize) {
    debug!(
        %conn_id,
        user_id,
        payload_bytes,
        "connection.event_invalid_json"
    );
}

/// Store failures are operator problems; everything else is the client's.
pub fn log_service_error(conn_id: ConnId, user_id: UserId, event_type: &str, err: &ServiceError) {
    match err.kind() {
        ErrorKind::Transient => error!(
            %conn_id,
            user_id,
            event_type,
            err = %err,
            "connection.event_failed"
        ),
        kind => debug!(
            %conn_id,
            user_id,
            event_type,
            kind = ?kind,
            code = ?err.code(),
            "connection.event_rejected"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use std::{
        io,
        io::Write,
        sync::{Arc, Mutex},
    };
    use tracing_subscriber::{fmt::MakeWriter, prelude::*};
    use uuid::Uuid;

    #[derive(Clone, Default)]
    struct SharedWriter {
        buf: Arc<Mutex<Vec<u8>>>,
    }

    impl SharedWriter {
        fn into_string(self) -> String {
            let bytes = self.buf.lock().expect("buffer lock poisoned").clone();
            String::from_utf8(bytes).expect("log output should be utf8")
        }
    }

    impl<'a> MakeWriter<'a> for SharedWriter {
        type Writer = SharedWriterGuard;

        fn make_writer(&'a self) -> Self::Writer {
            SharedWriterGuard {
                buf: Arc::clone(&self.buf),
            }
        }
    }

    struct SharedWriterGuard {
        buf: Arc<Mutex<Vec<u8>>>,
    }

    impl Write for SharedWriterGuard {
        fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
            self.buf
                .lock()
                .expect("buffer lock poisoned")
                .extend_from_slice(bytes);
            Ok(bytes.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn logs_only_metadata_without_payload_contents() {
        let writer = SharedWriter::default();

        let subscriber = tracing_subscriber::registry().with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .without_time()
                .with_writer(writer.clone()),
        );

        let solution = "fn two_sum(nums: Vec<i32>) -> Vec<i32>";
        let store_detail = "redis://10.0.0.7 refused";

        tracing::subscriber::with_default(subscriber, || {
            log_inbound_event(Uuid::new_v4(), 11, "submission", 321);
            log_invalid_json(Uuid::new_v4(), 11, 144);
            log_service_error(
                Uuid::new_v4(),
                11,
                "accept_invitation",
                &ServiceError::InviteNotFound,
            );
            log_service_error(
                Uuid::new_v4(),
                11,
                "enter_queue",
                &ServiceError::Store(StoreError::Unavailable(store_detail.to_string())),
            );

            // Never handed to the logger.
            let _ = solution;
        });

        let output = writer.into_string();

        assert!(output.contains("connection.event_received"));
        assert!(output.contains("submission"));
        assert!(output.contains("payload_bytes=321"));
        assert!(output.contains("connection.event_rejected"));
        assert!(output.contains("InviteNotFound"));
        assert!(output.contains("connection.event_failed"));
        assert!(output.contains(store_detail));
        assert!(!output.contains(solution));
    }
}
