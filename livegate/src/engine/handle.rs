// livegate/src/engine/handle.rs
//
// Process-wide engine handle with generation-based replacement.
//
// Every live pipeline instance sits in an `Arc<Generation>`. Callers clone
// the current Arc for the length of one invocation and run against that
// clone. A rebuild creates a fresh instance and publishes it as generation
// N+1; the retired instance is destroyed when its last in-flight caller lets
// go. Nobody can reach an instance after it has been destroyed.
//
// Rebuilds are serialized. A caller asking to rebuild generation N after
// someone else already published N+1 gets N+1 back without a second rebuild,
// so a burst of license failures costs one rebuild, not one per request.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info};

use super::{EngineBackend, EngineConfig, EngineError, LivenessPipeline, Meta, PipelineResult};

// ── Generation ────────────────────────────────────────────────────────────────

pub struct Generation {
    id:       u64,
    pipeline: Box<dyn LivenessPipeline>,
}

impl Generation {
    pub fn id(&self) -> u64 { self.id }

    /// Open the image at `path`, run the liveness check, release the image.
    pub fn check_liveness(&self, path: &Path, meta: &Meta) -> Result<PipelineResult, EngineError> {
        let image = self.pipeline.open_image(path)?;
        let result = self.pipeline.check_liveness(&image, meta);
        drop(image);
        result
    }
}

impl Drop for Generation {
    fn drop(&mut self) {
        debug!(generation = self.id, "engine pipeline destroyed");
    }
}

// ── Handle ────────────────────────────────────────────────────────────────────

pub struct EngineHandle {
    backend:     Arc<dyn EngineBackend>,
    name:        String,
    config:      EngineConfig,
    current:     RwLock<Arc<Generation>>,
    rebuild:     Mutex<()>,
    recreations: AtomicU64,
}

impl EngineHandle {
    /// Create generation 1. Failure here means the service cannot answer
    /// requests; the caller treats it as fatal.
    pub fn create(
        backend: Arc<dyn EngineBackend>,
        name:    impl Into<String>,
        config:  EngineConfig,
    ) -> Result<Self, EngineError> {
        let name = name.into();
        let pipeline = backend.create(&name, &config)?;
        info!(pipeline = %name, calibration = ?config.calibration, "engine pipeline created");
        Ok(Self {
            backend,
            name,
            config,
            current:     RwLock::new(Arc::new(Generation { id: 1, pipeline })),
            rebuild:     Mutex::new(()),
            recreations: AtomicU64::new(0),
        })
    }

    /// Borrow the current generation for one invocation.
    pub fn acquire(&self) -> Arc<Generation> {
        Arc::clone(&self.current.read())
    }

    pub fn generation(&self) -> u64 { self.current.read().id }

    pub fn recreations(&self) -> u64 { self.recreations.load(Ordering::Relaxed) }


    /// Replace generation `stale` with a fresh instance.
    ///
    /// Returns the generation callers should use next. If `stale` was already
    /// replaced the current one is returned untouched. If the backend fails to
    /// build a new instance the current generation stays published and the
    /// error is returned.
    pub fn recreate(&self, stale: u64) -> Result<Arc<Generation>, EngineError> {
        let _serial = self.rebuild.lock();

        let current = self.acquire();
        if current.id != stale {
            debug!(stale, current = current.id, "engine already rebuilt by another request");
            return Ok(current);
        }

        let pipeline = match self.backend.create(&self.name, &self.config) {
            Ok(p)  => p,
            Err(e) => {
                error!(generation = stale, error = %e, "engine rebuild failed; keeping current instance");
                return Err(e);
            }
        };

        let next = Arc::new(Generation { id: stale + 1, pipeline });
        let retired = std::mem::replace(&mut *self.current.write(), Arc::clone(&next));
        self.recreations.fetch_add(1, Ordering::Relaxed);
        info!(
            pipeline = %self.name,
            retired = retired.id,
            generation = next.id,
            in_flight = Arc::strong_count(&retired).saturating_sub(2),
            "engine pipeline rebuilt"
        );
        Ok(next)
    }
}
