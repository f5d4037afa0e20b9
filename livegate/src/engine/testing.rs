// livegate/src/engine/testing.rs
//
// Spy engine for unit tests: counts creations and invocations, records the
// lifecycle of every pipeline instance, and can inject delays around
// create/invoke to widen race windows.

use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{
    EngineBackend, EngineConfig, EngineError, EngineStatus, Image, ImageFormat, LivenessPipeline,
    Meta, PipelineResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle { Created, Invoked, Destroyed }

struct Shared {
    creations:    AtomicU64,
    invocations:  AtomicU64,
    violations:   AtomicU64,
    fail_creates: AtomicBool,
    panic_invoke: AtomicBool,
    create_delay: Duration,
    invoke_delay: Duration,
    script:       Mutex<VecDeque<Result<PipelineResult, EngineError>>>,
    fallback:     Result<PipelineResult, EngineError>,
    destroyed:    Mutex<HashSet<u64>>,
    events:       Mutex<Vec<(u64, Lifecycle)>>,
}

#[derive(Clone)]
pub struct SpyBackend {
    shared: Arc<Shared>,
}

impl SpyBackend {
    /// Every invocation returns `result`.
    pub fn returning(result: Result<PipelineResult, EngineError>) -> Self {
        Self::scripted(Vec::new(), result)
    }

    /// Invocations pop from `script` first, then fall back to `fallback`.
    pub fn scripted(
        script:   Vec<Result<PipelineResult, EngineError>>,
        fallback: Result<PipelineResult, EngineError>,
    ) -> Self {
        Self::build(script, fallback, Duration::ZERO, Duration::ZERO)
    }

    pub fn with_delays(self, create: Duration, invoke: Duration) -> Self {
        let script = self.shared.script.lock().drain(..).collect();
        Self::build(script, self.shared.fallback.clone(), create, invoke)
    }

    pub fn failing_creates(self) -> Self {
        self.set_fail_creates(true);
        self
    }

    fn build(
        script:   Vec<Result<PipelineResult, EngineError>>,
        fallback: Result<PipelineResult, EngineError>,
        create_delay: Duration,
        invoke_delay: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                creations:    AtomicU64::new(0),
                invocations:  AtomicU64::new(0),
                violations:   AtomicU64::new(0),
                fail_creates: AtomicBool::new(false),
                panic_invoke: AtomicBool::new(false),
                create_delay,
                invoke_delay,
                script:       Mutex::new(script.into()),
                fallback,
                destroyed:    Mutex::new(HashSet::new()),
                events:       Mutex::new(Vec::new()),
            }),
        }
    }

    /// Invocations panic, as a crashing engine call would.
    pub fn panicking_invokes(self) -> Self {
        self.shared.panic_invoke.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_fail_creates(&self, fail: bool) {
        self.shared.fail_creates.store(fail, Ordering::SeqCst);
    }

    pub fn creations(&self) -> u64 { self.shared.creations.load(Ordering::SeqCst) }
    pub fn invocations(&self) -> u64 { self.shared.invocations.load(Ordering::SeqCst) }

    /// Invocations that reached an instance already marked destroyed.
    pub fn violations(&self) -> u64 { self.shared.violations.load(Ordering::SeqCst) }

    pub fn events(&self) -> Vec<(u64, Lifecycle)> { self.shared.events.lock().clone() }
}

impl EngineBackend for SpyBackend {
    fn create(&self, _name: &str, _config: &EngineConfig)
        -> Result<Box<dyn LivenessPipeline>, EngineError>
    {
        if !self.shared.create_delay.is_zero() {
            std::thread::sleep(self.shared.create_delay);
        }
        if self.shared.fail_creates.load(Ordering::SeqCst) {
            return Err(EngineError::from_status(EngineStatus::InvalidConfig, "spy: create refused"));
        }
        let id = self.shared.creations.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.events.lock().push((id, Lifecycle::Created));
        Ok(Box::new(SpyPipeline { id, shared: Arc::clone(&self.shared) }))
    }
}

struct SpyPipeline {
    id:     u64,
    shared: Arc<Shared>,
}

impl LivenessPipeline for SpyPipeline {
    // Accepts any staged bytes, including an empty upload.
    fn open_image(&self, path: &Path) -> Result<Image, EngineError> {
        let bytes = std::fs::read(path).unwrap_or_default();
        let format = ImageFormat::sniff(&bytes);
        Ok(Image { path: path.to_path_buf(), bytes, format })
    }

    fn check_liveness(&self, _image: &Image, _meta: &Meta) -> Result<PipelineResult, EngineError> {
        self.shared.invocations.fetch_add(1, Ordering::SeqCst);
        if self.shared.panic_invoke.load(Ordering::SeqCst) {
            panic!("spy: engine crashed");
        }
        if self.shared.destroyed.lock().contains(&self.id) {
            self.shared.violations.fetch_add(1, Ordering::SeqCst);
        }
        self.shared.events.lock().push((self.id, Lifecycle::Invoked));
        if !self.shared.invoke_delay.is_zero() {
            std::thread::sleep(self.shared.invoke_delay);
        }
        if self.shared.destroyed.lock().contains(&self.id) {
            self.shared.violations.fetch_add(1, Ordering::SeqCst);
        }
        let scripted = self.shared.script.lock().pop_front();
        scripted.unwrap_or_else(|| self.shared.fallback.clone())
    }
}

impl Drop for SpyPipeline {
    fn drop(&mut self) {
        self.shared.destroyed.lock().insert(self.id);
        self.shared.events.lock().push((self.id, Lifecycle::Destroyed));
    }
}
