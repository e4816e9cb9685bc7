//! Receive loop: handshake first, then framed messages.

use std::io;
use std::sync::atomic::Ordering;
use tokio::io::AsyncReadExt;

use crate::error::SessionError;
use crate::protocol::Message;
use crate::session::{BoxReader, Session};

impl Session {
    pub(crate) async fn receive_loop(self) -> Result<(), SessionError> {
        if self
            .inner
            .receiving
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        let reader = match self.inner.reader.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(mut reader) = reader else {
            return Ok(());
        };

        let result = tokio::select! {
            _ = self.inner.cancel.cancelled() => Err(SessionError::Shutdown),
            result = self.receive(&mut reader) => result,
        };

        match result {
            Ok(()) => Ok(()),
            Err(SessionError::Shutdown) => Err(SessionError::Shutdown),
            Err(SessionError::ConnectionClosed) => {
                self.inner.log.debug(format_args!("Peer closed the connection"));
                self.inner.handler.on_close(&self);
                Ok(())
            }
            // Already reported through on_handshake_failed.
            Err(SessionError::UnacceptableHandshake) => Err(SessionError::UnacceptableHandshake),
            Err(err) => {
                self.inner.log.warn(format_args!("Receive failed: {}", err));
                self.inner.handler.on_failure(&self, &err);
                Err(err)
            }
        }
    }

    async fn receive(&self, reader: &mut BoxReader) -> Result<(), SessionError> {
        while !self.is_established() {
            self.receive_handshake(reader).await?;
        }

        loop {
            self.receive_message(reader).await?;
        }
    }

    async fn receive_handshake(&self, reader: &mut BoxReader) -> Result<(), SessionError> {
        let protocol = &self.inner.protocol;
        let mut handshake = protocol.empty_handshake();
        handshake.read_from(reader).await?;

        if !protocol.is_acceptable_handshake(self, handshake.as_ref()) {
            self.inner
                .log
                .warn(format_args!("Rejected handshake {:?}", handshake));
            self.inner
                .handler
                .on_handshake_failed(self, handshake.as_ref());
            return Err(SessionError::UnacceptableHandshake);
        }

        if self
            .inner
            .established
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.inner.log.debug(format_args!("Session established"));
            self.inner.handler.on_handshake(self, handshake.as_ref());
        }
        Ok(())
    }

    async fn receive_message(&self, reader: &mut BoxReader) -> Result<(), SessionError> {
        let protocol = &self.inner.protocol;
        let mut header = protocol.empty_header();
        header.read_from(reader).await?;
        let payload_len = header.payload_len();

        if !protocol.is_acceptable_message(self, header.as_ref()) {
            self.inner.log.trace(format_args!(
                "Discarding unacceptable message, {} payload bytes",
                payload_len
            ));
            return discard(reader, payload_len).await;
        }

        let frame_len = message_len(header.encoded_len(), payload_len)?;

        let mut buf = self.inner.recv_buf.lock().await;
        buf.clear();
        buf.reserve(frame_len);
        header.write_to(&mut buf);
        let header_len = buf.len();
        buf.resize(message_len(header_len, payload_len)?, 0);
        reader.read_exact(&mut buf[header_len..]).await?;

        self.inner
            .handler
            .on_receive(self, Message::new(header.as_ref(), &buf, header_len));
        buf.clear();
        Ok(())
    }
}

/// Size of the receive buffer for one message
fn message_len(header_len: usize, payload_len: usize) -> Result<usize, SessionError> {
    header_len.checked_add(payload_len).ok_or_else(|| {
        SessionError::io(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message length overflows: header {} + payload {}", header_len, payload_len),
        ))
    })
}

/// Consume and drop exactly `len` payload bytes
async fn discard(reader: &mut BoxReader, len: usize) -> Result<(), SessionError> {
    let wanted = len as u64;
    let copied = tokio::io::copy(&mut (&mut *reader).take(wanted), &mut tokio::io::sink()).await?;
    if copied < wanted {
        return Err(SessionError::ConnectionClosed);
    }
    Ok(())
}
