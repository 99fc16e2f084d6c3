//! Instrumented mock backend for tests.
//!
//! Records every capability-contract call in order so tests can assert
//! lifecycle invariants (free-path, commit-before-upkeep ordering) and can
//! inject failures into the upload and commit hooks.

use crate::backend::{
    BackendDriver, BufferToken, BufferView, ContextToken, ContextView, DeviceBackend, SourceToken,
    SourceView,
};
use crate::config::ContextAttr;
use crate::context::ListenerParams;
use crate::error::{Result, SonaraError};
use crate::format::BufferFormat;
use crate::source::SourceParams;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    Configure(Vec<ContextAttr>),
    Close,
    AllocateContext,
    FreeContext(u64),
    AllocateSource(u64),
    FreeSource(u64),
    AllocateBuffer,
    FreeBuffer(u64),
    Upload { buf: u64, bytes: usize },
    CommitSource { src: u64 },
    CommitBuffer { buf: u64 },
    CommitContext { ctx: u64 },
    Upkeep,
}

#[derive(Default)]
struct LogInner {
    calls: Mutex<Vec<Call>>,
    fail_upload: AtomicBool,
    fail_commit_source: AtomicBool,
    last_source: Mutex<Option<SourceParams>>,
    last_listener: Mutex<Option<ListenerParams>>,
}

/// Shared handle onto the mock's recorded call stream.
#[derive(Clone, Default)]
pub(crate) struct CallLog {
    inner: Arc<LogInner>,
}

impl CallLog {
    fn record(&self, call: Call) {
        self.inner.calls.lock().unwrap().push(call);
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.inner.calls.lock().unwrap().clone()
    }

    pub(crate) fn clear(&self) {
        self.inner.calls.lock().unwrap().clear();
    }

    pub(crate) fn fail_next_upload(&self) {
        self.inner.fail_upload.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_next_commit_source(&self) {
        self.inner.fail_commit_source.store(true, Ordering::SeqCst);
    }

    /// The source block most recently accepted by `commit_source`; this is
    /// the mock's deep copy, i.e. what a render pass would observe.
    pub(crate) fn last_committed_source(&self) -> Option<SourceParams> {
        *self.inner.last_source.lock().unwrap()
    }

    pub(crate) fn last_committed_listener(&self) -> Option<ListenerParams> {
        *self.inner.last_listener.lock().unwrap()
    }
}

pub(crate) struct MockDriver {
    name: String,
    source_capacity: usize,
    opens: Arc<AtomicUsize>,
    log: CallLog,
}

impl MockDriver {
    pub(crate) fn claiming(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            source_capacity: 32,
            opens: Arc::new(AtomicUsize::new(0)),
            log: CallLog::default(),
        }
    }

    pub(crate) fn with_source_capacity(mut self, capacity: usize) -> Self {
        self.source_capacity = capacity;
        self
    }

    pub(crate) fn open_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.opens)
    }

    pub(crate) fn call_log(&self) -> CallLog {
        self.log.clone()
    }
}

impl BackendDriver for MockDriver {
    fn enumerate(&self, callback: &mut dyn FnMut(&str)) {
        callback(&self.name);
    }

    fn open(&self, name: Option<&str>) -> Option<Box<dyn DeviceBackend>> {
        match name {
            Some(requested) if requested != self.name => None,
            _ => {
                self.opens.fetch_add(1, Ordering::SeqCst);
                Some(Box::new(MockBackend {
                    log: self.log.clone(),
                    source_capacity: self.source_capacity,
                    live_sources: Mutex::new(HashSet::new()),
                    next_token: AtomicU64::new(1),
                }))
            }
        }
    }
}

pub(crate) struct MockBackend {
    log: CallLog,
    source_capacity: usize,
    live_sources: Mutex<HashSet<u64>>,
    next_token: AtomicU64,
}

impl MockBackend {
    fn mint(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::SeqCst)
    }
}

impl DeviceBackend for MockBackend {
    fn configure(&self, attrs: &[ContextAttr]) -> Result<()> {
        self.log.record(Call::Configure(attrs.to_vec()));
        Ok(())
    }

    fn close(&self) {
        self.log.record(Call::Close);
    }

    fn allocate_context(&self) -> Option<ContextToken> {
        self.log.record(Call::AllocateContext);
        Some(ContextToken::new(self.mint()))
    }

    fn free_context(&self, ctx: ContextToken) {
        self.log.record(Call::FreeContext(ctx.raw()));
    }

    fn allocate_source(&self, ctx: ContextToken) -> Option<SourceToken> {
        self.log.record(Call::AllocateSource(ctx.raw()));
        let mut live = self.live_sources.lock().unwrap();
        if live.len() >= self.source_capacity {
            return None;
        }
        let token = self.mint();
        live.insert(token);
        Some(SourceToken::new(token))
    }

    fn free_source(&self, src: SourceToken) {
        self.log.record(Call::FreeSource(src.raw()));
        self.live_sources.lock().unwrap().remove(&src.raw());
    }

    fn allocate_buffer(&self) -> Option<BufferToken> {
        self.log.record(Call::AllocateBuffer);
        Some(BufferToken::new(self.mint()))
    }

    fn free_buffer(&self, buf: BufferToken) {
        self.log.record(Call::FreeBuffer(buf.raw()));
    }

    fn upload(
        &self,
        buf: BufferToken,
        _format: BufferFormat,
        data: &[u8],
        _sample_rate: u32,
    ) -> Result<()> {
        self.log.record(Call::Upload {
            buf: buf.raw(),
            bytes: data.len(),
        });
        if self.log.inner.fail_upload.swap(false, Ordering::SeqCst) {
            return Err(SonaraError::Backend("injected upload failure".to_owned()));
        }
        Ok(())
    }

    fn commit_source(&self, view: SourceView<'_>) -> Result<()> {
        self.log.record(Call::CommitSource {
            src: view.token.raw(),
        });
        if self
            .log
            .inner
            .fail_commit_source
            .swap(false, Ordering::SeqCst)
        {
            return Err(SonaraError::Backend("injected commit failure".to_owned()));
        }
        // Deep copy: the view dies when this call returns.
        *self.log.inner.last_source.lock().unwrap() = Some(*view.params);
        Ok(())
    }

    fn commit_buffer(&self, view: BufferView<'_>) -> Result<()> {
        self.log.record(Call::CommitBuffer {
            buf: view.token.raw(),
        });
        Ok(())
    }

    fn commit_context(&self, view: ContextView<'_>) -> Result<()> {
        self.log.record(Call::CommitContext {
            ctx: view.token.raw(),
        });
        *self.log.inner.last_listener.lock().unwrap() = Some(*view.listener);
        Ok(())
    }

    fn upkeep(&self) {
        self.log.record(Call::Upkeep);
    }
}
