//! Shared helpers for endpoint integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use rtp_endpoints::{
    LoopbackTransport, ReadStream, RtcpSession, RtpHeader, RtpSession, Transport, TransportError,
    TransportResult, WriteStream,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Knobs for `ScriptedTransport`
#[derive(Default)]
pub struct Script {
    /// Number of upcoming RTCP opens that fail
    pub failing_rtcp_opens: AtomicUsize,
    /// RTCP opens never complete while set
    pub stall_rtcp_opens: AtomicBool,
    /// Whether closing a stream reports an error (the stream still closes)
    pub close_error: AtomicBool,
    /// Streams closed so far
    pub closes: AtomicUsize,
    /// RTP read streams handed out so far
    pub rtp_opens: AtomicUsize,
}

/// Loopback transport with scripted failures and close accounting
pub struct ScriptedTransport {
    inner: Arc<LoopbackTransport>,
    pub script: Arc<Script>,
}

impl ScriptedTransport {
    pub fn wrap(inner: Arc<LoopbackTransport>) -> Arc<Self> {
        Arc::new(ScriptedTransport {
            inner,
            script: Arc::new(Script::default()),
        })
    }

    pub fn closes(&self) -> usize {
        self.script.closes.load(Ordering::SeqCst)
    }
}

struct ScriptedStream {
    inner: Arc<dyn ReadStream>,
    script: Arc<Script>,
}

#[async_trait]
impl ReadStream for ScriptedStream {
    async fn read(&self, buf: &mut [u8]) -> TransportResult<usize> {
        self.inner.read(buf).await
    }

    async fn close(&self) -> TransportResult<()> {
        self.script.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close().await?;
        if self.script.close_error.load(Ordering::SeqCst) {
            return Err(TransportError::Session("close failed".to_string()));
        }
        Ok(())
    }
}

fn scripted(inner: Arc<dyn ReadStream>, script: &Arc<Script>) -> Arc<dyn ReadStream> {
    Arc::new(ScriptedStream {
        inner,
        script: script.clone(),
    })
}

struct ScriptedRtp {
    inner: Arc<dyn RtpSession>,
    script: Arc<Script>,
}

#[async_trait]
impl RtpSession for ScriptedRtp {
    async fn open_read_stream(&self, ssrc: u32) -> TransportResult<Arc<dyn ReadStream>> {
        let stream = self.inner.open_read_stream(ssrc).await?;
        self.script.rtp_opens.fetch_add(1, Ordering::SeqCst);
        Ok(scripted(stream, &self.script))
    }

    async fn accept_stream(&self) -> TransportResult<(Arc<dyn ReadStream>, u32)> {
        let (stream, ssrc) = self.inner.accept_stream().await?;
        self.script.rtp_opens.fetch_add(1, Ordering::SeqCst);
        Ok((scripted(stream, &self.script), ssrc))
    }

    async fn open_write_stream(&self) -> TransportResult<Arc<dyn WriteStream>> {
        self.inner.open_write_stream().await
    }
}

struct ScriptedRtcp {
    inner: Arc<dyn RtcpSession>,
    script: Arc<Script>,
}

#[async_trait]
impl RtcpSession for ScriptedRtcp {
    async fn open_read_stream(&self, ssrc: u32) -> TransportResult<Arc<dyn ReadStream>> {
        let failing = self
            .script
            .failing_rtcp_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TransportError::Session("rtcp open refused".to_string()));
        }
        if self.script.stall_rtcp_opens.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let stream = self.inner.open_read_stream(ssrc).await?;
        Ok(scripted(stream, &self.script))
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn rtp_session(&self) -> TransportResult<Arc<dyn RtpSession>> {
        Ok(Arc::new(ScriptedRtp {
            inner: self.inner.rtp_session().await?,
            script: self.script.clone(),
        }))
    }

    async fn rtcp_session(&self) -> TransportResult<Arc<dyn RtcpSession>> {
        Ok(Arc::new(ScriptedRtcp {
            inner: self.inner.rtcp_session().await?,
            script: self.script.clone(),
        }))
    }
}

/// Long enough for a spawned task to have reached its suspension point
pub const SETTLE: Duration = Duration::from_millis(20);

/// Upper bound for something that must complete
pub const DEADLINE: Duration = Duration::from_secs(2);

pub fn header(ssrc: u32, sequence_number: u16) -> RtpHeader {
    RtpHeader::new(111, sequence_number, sequence_number as u32 * 960, ssrc)
}
