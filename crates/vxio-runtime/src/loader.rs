use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use vxio_core::config::LoaderConfig;
use vxio_core::error::ConfigError;
use vxio_core::schema::DataSchema;
use vxio_core::store::SampleStore;
use vxio_observe::metrics::{Counter, DurationAgg, Gauge};
use vxio_store::output::OutputStore;

use crate::assembler::BatchAssembler;
use crate::error::LoaderError;
use crate::scheduler::IndexScheduler;
use crate::slots::{SlotPayload, SlotRing};
use crate::types::{Batch, ExtraOutput, ScoreMatrix};
use crate::writer::ResultWriter;

#[derive(Debug, Default)]
pub struct LoaderMetrics {
    pub batches_produced_total: Counter,
    pub batches_failed_total: Counter,
    pub batches_served_total: Counter,
    pub batches_discarded_total: Counter,
    pub samples_served_total: Counter,
    pub voxels_served_total: Counter,
    pub records_written_total: Counter,
    pub ready_slots: Gauge,
    pub ready_slots_high_water: Gauge,
    pub consumer_wait: DurationAgg,
    pub assemble: DurationAgg,
}

impl LoaderMetrics {
    pub fn log_snapshot(&self) {
        let wait = self.consumer_wait.snapshot();
        let assemble = self.assemble.snapshot();
        info!(
            target: "vxio_metrics",
            batches_produced_total = self.batches_produced_total.get(),
            batches_failed_total = self.batches_failed_total.get(),
            batches_served_total = self.batches_served_total.get(),
            batches_discarded_total = self.batches_discarded_total.get(),
            samples_served_total = self.samples_served_total.get(),
            voxels_served_total = self.voxels_served_total.get(),
            records_written_total = self.records_written_total.get(),
            ready_slots = self.ready_slots.get(),
            ready_slots_high_water = self.ready_slots_high_water.get(),
            consumer_wait_avg_us = wait.avg_ns() / 1_000,
            consumer_wait_total_ms = wait.total_ms(),
            assemble_avg_us = assemble.avg_ns() / 1_000,
            assemble_total_ms = assemble.total_ms(),
            "loader metrics"
        );
    }
}

/// State shared between the consumer handle and the producer threads.
#[derive(Debug)]
struct Shared {
    scheduler: IndexScheduler,
    assembler: BatchAssembler,
    ring: SlotRing,
    paused: AtomicBool,
    shutdown: AtomicBool,
    metrics: Arc<LoaderMetrics>,
}

impl Shared {
    fn running(&self) -> bool {
        !self.paused.load(Ordering::SeqCst) && !self.shutdown.load(Ordering::SeqCst)
    }

    fn note_ready(&self) {
        let now = self.metrics.ready_slots.add(1);
        self.metrics.ready_slots_high_water.max(now);
    }
}

/// Multi-threaded batch loader over a shared [`SampleStore`].
///
/// `num_threads` producers each own one slot of a [`SlotRing`] and keep it filled; a single
/// consumer drains the slots in round-robin order through [`SparseLoader::next`].
#[derive(Debug)]
pub struct SparseLoader {
    config: LoaderConfig,
    schema: DataSchema,
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
    last_served: Option<usize>,
    start_index: usize,
    writer: ResultWriter,
}

impl SparseLoader {
    pub fn new(
        config: LoaderConfig,
        store: Arc<SampleStore>,
        output: Option<Box<dyn OutputStore>>,
    ) -> Result<Self, LoaderError> {
        let schema = config.validate()?;
        if store.schema() != &schema {
            return Err(ConfigError::SchemaMismatch {
                store: store.schema().keys().to_vec(),
                config: schema.keys().to_vec(),
            }
            .into());
        }
        if store.dim() != config.data_dim {
            return Err(ConfigError::DimMismatch {
                store: store.dim(),
                config: config.data_dim,
            }
            .into());
        }
        let scheduler = IndexScheduler::new(&config, store.num_entries())?;
        let assembler = BatchAssembler::new(Arc::clone(&store), &config)?;
        let writer = ResultWriter::new(store, output)?;
        let shared = Arc::new(Shared {
            scheduler,
            assembler,
            ring: SlotRing::new(config.num_threads, config.wait),
            paused: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            metrics: Arc::new(LoaderMetrics::default()),
        });
        Ok(Self {
            start_index: config.start_index,
            config,
            schema,
            shared,
            threads: Vec::new(),
            last_served: None,
            writer,
        })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn schema(&self) -> &DataSchema {
        &self.schema
    }

    pub fn store(&self) -> &Arc<SampleStore> {
        self.shared.assembler.store()
    }

    pub fn metrics(&self) -> Arc<LoaderMetrics> {
        Arc::clone(&self.shared.metrics)
    }

    pub fn is_started(&self) -> bool {
        !self.threads.is_empty()
    }

    pub fn last_served(&self) -> Option<usize> {
        self.last_served
    }

    /// Launches the producers on first call; resumes them after [`SparseLoader::stop`].
    pub fn start(&mut self) -> Result<(), LoaderError> {
        if self.is_started() {
            if self.shared.paused.swap(false, Ordering::SeqCst) {
                info!(target: "vxio_proof", event = "loader_resumed", "producers resumed");
            }
            return Ok(());
        }
        self.shared.paused.store(false, Ordering::SeqCst);
        for thread_id in 0..self.config.num_threads {
            let shared = Arc::clone(&self.shared);
            let handle = std::thread::Builder::new()
                .name(format!("vxio-producer-{thread_id}"))
                .spawn(move || producer_loop(shared, thread_id))
                .map_err(LoaderError::Spawn)?;
            self.threads.push(handle);
        }
        info!(
            target: "vxio_proof",
            event = "loader_started",
            num_threads = self.config.num_threads as u64,
            batch_per_step = self.config.batch_per_step as u64,
            num_gpus = self.config.num_gpus as u64,
            shuffle = self.config.shuffle,
            "producers started"
        );
        Ok(())
    }

    /// Pulls the next batch.
    ///
    /// `slot = None` continues the round robin after the last released slot. With
    /// `release = false` the batch is copied out and the slot stays ready, so the same batch
    /// is returned again by the next call for that slot.
    pub fn next(&mut self, slot: Option<usize>, release: bool) -> Result<Batch, LoaderError> {
        let num_threads = self.config.num_threads;
        let slot = match slot {
            Some(slot) if slot >= num_threads => {
                return Err(ConfigError::InvalidSlot { slot, num_threads }.into())
            }
            Some(slot) => slot,
            None => self.last_served.map_or(0, |last| (last + 1) % num_threads),
        };
        if slot >= self.threads.len() || self.shared.paused.load(Ordering::SeqCst) {
            return Err(ConfigError::NotStarted { slot }.into());
        }

        let shared = &self.shared;
        let payload: Option<SlotPayload> = {
            let _wait = shared.metrics.consumer_wait.timer();
            if !shared.ring.wait_until_ready(slot, || shared.running()) {
                None
            } else if release {
                shared.ring.take(slot)
            } else {
                shared.ring.peek(slot)
            }
        };
        let payload = payload.ok_or(ConfigError::NotStarted { slot })?;

        if release {
            shared.metrics.ready_slots.sub(1);
            shared.metrics.batches_served_total.inc();
            self.last_served = Some(slot);
        }
        let batch = payload.map_err(|source| LoaderError::Batch {
            thread_id: slot,
            source,
        })?;
        if release {
            shared
                .metrics
                .samples_served_total
                .inc_by(batch.sample_count() as u64);
            shared
                .metrics
                .voxels_served_total
                .inc_by(batch.total_rows() as u64);
            debug!(slot, sequence = batch.sequence, "batch served");
        }
        Ok(batch)
    }

    /// `next(None, true)`.
    pub fn next_batch(&mut self) -> Result<Batch, LoaderError> {
        self.next(None, true)
    }

    /// Pauses producers, waits out in-flight fills, drops pending batches and rewinds the
    /// sequential cursors. Threads stay alive; [`SparseLoader::start`] resumes them.
    pub fn stop(&mut self) {
        if !self.is_started() {
            return;
        }
        self.shared.paused.store(true, Ordering::SeqCst);
        let mut discarded = 0u64;
        for slot in 0..self.shared.ring.len() {
            if self.shared.ring.discard(slot) {
                debug!(slot, "discarded pending batch");
                discarded += 1;
            }
        }
        self.shared.metrics.ready_slots.sub(discarded);
        self.shared
            .metrics
            .batches_discarded_total
            .inc_by(discarded);
        self.shared.scheduler.reset_cursors(self.start_index);
        self.last_served = None;
        info!(
            target: "vxio_proof",
            event = "loader_stopped",
            discarded,
            "producers paused"
        );
    }

    /// Stops, moves the sequential sweep to `start_index`, and resumes producers that were
    /// running before.
    pub fn reset(&mut self, start_index: usize) -> Result<(), LoaderError> {
        let was_running = self.is_started() && !self.shared.paused.load(Ordering::SeqCst);
        self.stop();
        self.start_index = start_index;
        self.shared.scheduler.reset_cursors(start_index);
        info!(
            target: "vxio_proof",
            event = "loader_reset",
            start_index = start_index as u64,
            sequential = self.shared.scheduler.is_sequential(),
            "cursors reset"
        );
        if was_running {
            self.start()?;
        }
        Ok(())
    }

    /// Writes predictions for a served batch; see [`ResultWriter::store_batch`].
    pub fn store_batch<I: AsRef<[usize]>>(
        &mut self,
        sample_indices: &[I],
        predictions: &[ScoreMatrix],
        extras: &[ExtraOutput],
    ) -> Result<usize, LoaderError> {
        let written = self
            .writer
            .store_batch(sample_indices, predictions, extras)?;
        self.shared
            .metrics
            .records_written_total
            .inc_by(written as u64);
        Ok(written)
    }

    pub fn has_output(&self) -> bool {
        self.writer.has_output()
    }

    /// Closes the output destination. The loader keeps serving batches afterwards.
    pub fn finalize(&mut self) -> Result<(), LoaderError> {
        self.writer.close()
    }
}

impl Drop for SparseLoader {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("producer thread panicked");
            }
        }
    }
}

fn producer_loop(shared: Arc<Shared>, thread_id: usize) {
    info!(
        target: "vxio_proof",
        event = "producer_started",
        thread_id = thread_id as u64,
        "producer started"
    );
    let idle = shared.ring.wait_strategy().interval();
    let mut sequence = 0u64;
    while !shared.shutdown.load(Ordering::SeqCst) {
        if !shared
            .ring
            .wait_until_free(thread_id, || !shared.shutdown.load(Ordering::SeqCst))
        {
            break;
        }
        if !shared.ring.try_claim(thread_id) {
            continue;
        }
        // Checked after the claim so `stop` either sees FILLING and waits, or we see the pause.
        if shared.paused.load(Ordering::SeqCst) {
            shared.ring.abandon_claim(thread_id);
            std::thread::sleep(idle);
            continue;
        }

        let indices = shared.scheduler.next_indices(thread_id);
        let payload = {
            let _t = shared.metrics.assemble.timer();
            shared.assembler.assemble(&indices)
        };
        let payload = match payload {
            Ok(batch) => {
                shared.metrics.batches_produced_total.inc();
                debug!(
                    target: "vxio_proof",
                    event = "batch_produced",
                    thread_id = thread_id as u64,
                    sequence,
                    rows = batch.total_rows() as u64,
                    "batch ready"
                );
                Ok(Batch {
                    producer: thread_id,
                    sequence,
                    ..batch
                })
            }
            Err(err) => {
                shared.metrics.batches_failed_total.inc();
                warn!(thread_id, sequence, error = %err, "batch assembly failed");
                Err(err)
            }
        };
        sequence += 1;
        shared.note_ready();
        shared.ring.publish(thread_id, payload);
    }
    debug!(thread_id, "producer exiting");
}
