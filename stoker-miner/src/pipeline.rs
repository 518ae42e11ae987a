//! The producer/consumer pair that keeps the chain fed.
//!
//! Two tasks share nothing but the job cache and channels. The producer
//! ticks on a fixed period: sample the pool snapshot, build a job, cache it
//! under its wire id, push the work frame down the chain. The consumer sits
//! in a long receive: resolve each nonce against the cache, verify it
//! lock-free against the cloned job, and report anything that clears the
//! pool threshold.
//!
//! Results may arrive out of order and may carry ids from jobs long
//! superseded; the cache lookup, not arrival order, decides validity.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::asic::chain::{ResultReceiver, WorkSender};
use crate::asic::job::{TaskResult, WorkFrame};
use crate::cache::JobCache;
use crate::job_source::{builder, verify::verify, PoolSnapshot, PoolUpdate, Share};
use crate::tracing::prelude::*;
use crate::transport::{TransportRx, TransportTx};

#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// How often the producer materializes a fresh job.
    pub job_interval: Duration,
    /// Receive patience before the consumer loops; timeouts are the normal
    /// quiet state, not an error.
    pub recv_timeout: Duration,
    /// Local difficulty the chips filter at.
    pub asic_diff: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            job_interval: Duration::from_secs(2),
            recv_timeout: Duration::from_secs(60),
            asic_diff: 256,
        }
    }
}

/// Producer task: one fresh job per tick.
pub async fn run_producer<Tx: TransportTx>(
    mut work: WorkSender<Tx>,
    cache: Arc<JobCache>,
    pool: Arc<Mutex<Option<PoolSnapshot>>>,
    config: PipelineConfig,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let generation = work.generation;
    let mut ticker = tokio::time::interval(config.job_interval);
    let mut sequence: u8 = 0;
    let mut mask_difficulty: Option<u32> = None;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // Sample and release; the snapshot lock is never held across I/O.
        let Some(snapshot) = pool.lock().clone() else {
            debug!("No pool job yet, skipping tick");
            continue;
        };

        // Keep the chip-side filter tracking the pool difficulty.
        if mask_difficulty != Some(snapshot.difficulty) {
            work.set_difficulty_mask(snapshot.difficulty).await?;
            mask_difficulty = Some(snapshot.difficulty);
        }

        let job = builder::build(&snapshot, config.asic_diff)?;
        let wire_id = generation.job_id_encode(sequence);
        let frame = WorkFrame::assemble(generation, sequence, &job);

        // Cache before transmit: a chip can answer faster than we return.
        cache.put(wire_id, job);
        work.send_work(frame).await?;
        trace!(sequence, wire_id, "Dispatched job to chain");

        sequence = (sequence + 1) % generation.live_job_window();
    }

    info!("Job producer stopped");
    Ok(())
}

/// Consumer task: resolve, verify, report.
pub async fn run_consumer<Rx: TransportRx>(
    mut results: ResultReceiver<Rx>,
    cache: Arc<JobCache>,
    updates: mpsc::Sender<PoolUpdate>,
    config: PipelineConfig,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let generation = results.generation;
    let mut best_difficulty = 0.0f64;

    loop {
        let received = tokio::select! {
            _ = token.cancelled() => break,
            received = results.next(config.recv_timeout) => received,
        };

        let result = match received {
            Ok(Some(result)) => result,
            // Quiet line; keep waiting.
            Ok(None) => continue,
            Err(error) => {
                error!(%error, "Chain receive failed");
                continue;
            }
        };

        let candidate = match result {
            TaskResult::NonceCandidate(candidate) => candidate,
            TaskResult::RegisterResponse {
                register,
                data,
                chip_index,
            } => {
                debug!(register, data, chip_index, "Register reply outside bring-up");
                continue;
            }
        };

        // Canonical slot for the echoed id; a miss means the job was
        // superseded and the result is worthless, which is routine.
        let wire_id = generation.job_id_encode(candidate.sequence);
        let Some(job) = cache.get_clone(wire_id) else {
            debug!(wire_id, nonce = candidate.nonce, "Dropping result for stale job");
            continue;
        };

        let difficulty = verify(&job, candidate.nonce, candidate.rolled_version);
        trace!(
            difficulty,
            nonce = candidate.nonce,
            chip = candidate.chip_index,
            "Verified nonce"
        );

        if difficulty >= f64::from(job.pool_diff) {
            let share = Share {
                job_id: job.job_id.clone(),
                extranonce2: job.extranonce2.clone(),
                ntime: job.ntime,
                nonce: candidate.nonce,
                version: job.version | candidate.rolled_version,
            };
            info!(difficulty, nonce = candidate.nonce, "Share found");
            if updates.send(PoolUpdate::Submit(share)).await.is_err() {
                break;
            }
        }

        if difficulty > best_difficulty {
            best_difficulty = difficulty;
            if updates
                .send(PoolUpdate::BestDifficulty(difficulty))
                .await
                .is_err()
            {
                break;
            }
        }
    }

    info!("Result consumer stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asic::chain::Chain;
    use crate::asic::variant::ChipGeneration;
    use crate::job_source::JobNotify;
    use crate::transport::mock::MockTransport;

    fn snapshot() -> PoolSnapshot {
        PoolSnapshot {
            pool_id: 0,
            notify: JobNotify {
                job_id: "66a4".into(),
                prev_hash: "000000000000000117c80378b8da0e33559b5997f2ad55e2f7d18ec1975b9717"
                    .into(),
                coinbase_1: "01000000".into(),
                coinbase_2: "ffffffff".into(),
                merkle_branches: vec![],
                version: 0x2000_0000,
                version_mask: 0x1fff_e000,
                target: 0x1701_fa38,
                ntime: 0x68d6_17dc,
            },
            extranonce: "c0de0000".into(),
            extranonce2: "00000001".into(),
            difficulty: 512,
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            job_interval: Duration::from_secs(2),
            recv_timeout: Duration::from_secs(5),
            asic_diff: 256,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn producer_caches_and_dispatches_each_tick() {
        let mock = MockTransport::new();
        let (work, _results) = Chain::new(mock.clone(), ChipGeneration::Bm1368).split();
        let cache = Arc::new(JobCache::new());
        let pool = Arc::new(Mutex::new(Some(snapshot())));
        let token = CancellationToken::new();

        let handle = tokio::spawn(run_producer(
            work,
            Arc::clone(&cache),
            pool,
            config(),
            token.clone(),
        ));

        // Ticks at t=0, 2s, 4s.
        tokio::time::sleep(Duration::from_millis(4500)).await;
        token.cancel();
        handle.await.unwrap().unwrap();

        let sent = mock.sent_frames();
        // One ticket-mask write, then one work frame per tick.
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[0][5], 0x14, "difficulty mask goes out first");
        let gen = ChipGeneration::Bm1368;
        for (tick, frame) in sent[1..].iter().enumerate() {
            assert_eq!(frame[2], 0x21, "work frame type");
            assert_eq!(frame[4], gen.job_id_encode(tick as u8));
            assert!(cache.get_clone(gen.job_id_encode(tick as u8)).is_some());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn producer_idles_without_a_pool_job() {
        let mock = MockTransport::new();
        let (work, _results) = Chain::new(mock.clone(), ChipGeneration::Bm1366).split();
        let token = CancellationToken::new();

        let handle = tokio::spawn(run_producer(
            work,
            Arc::new(JobCache::new()),
            Arc::new(Mutex::new(None)),
            config(),
            token.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(7)).await;
        token.cancel();
        handle.await.unwrap().unwrap();
        assert!(mock.sent_frames().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn consumer_verifies_and_submits() {
        let mock = MockTransport::new();
        // Nonce reply from a capture: wire id decodes to sequence 1.
        mock.push_incoming(&[
            0xaa, 0x55, 0x18, 0x00, 0xa6, 0x40, 0x02, 0x99, 0x22, 0xf9, 0x91,
        ]);

        let (_work, results) = Chain::new(mock, ChipGeneration::Bm1368).split();
        let cache = Arc::new(JobCache::new());

        // Any difficulty clears a zero pool threshold, so the real hash of
        // this synthetic job does not matter.
        let mut job = builder::build(&snapshot(), 256).unwrap();
        job.pool_diff = 0;
        let slot = ChipGeneration::Bm1368.job_id_encode(1);
        cache.put(slot, job);

        let (updates_tx, mut updates_rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        let handle = tokio::spawn(run_consumer(
            results,
            cache,
            updates_tx,
            config(),
            token.clone(),
        ));

        let update = updates_rx.recv().await.unwrap();
        let PoolUpdate::Submit(share) = update else {
            panic!("expected a share, got {update:?}");
        };
        assert_eq!(share.job_id, "66a4");
        assert_eq!(share.extranonce2, "00000001");
        assert_eq!(share.nonce, 0x40a6_0018);
        assert_eq!(share.version, 0x2000_0000 | (0x22f9 << 13));

        let PoolUpdate::BestDifficulty(best) = updates_rx.recv().await.unwrap() else {
            panic!("expected a best-difficulty update");
        };
        assert!(best > 0.0);

        token.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn consumer_drops_results_for_evicted_jobs() {
        let mock = MockTransport::new();
        mock.push_incoming(&[
            0xaa, 0x55, 0x18, 0x00, 0xa6, 0x40, 0x02, 0x99, 0x22, 0xf9, 0x91,
        ]);

        let (_work, results) = Chain::new(mock, ChipGeneration::Bm1368).split();
        let (updates_tx, mut updates_rx) = mpsc::channel(8);
        let token = CancellationToken::new();

        // Cache left empty: the echoed id resolves to nothing.
        let handle = tokio::spawn(run_consumer(
            results,
            Arc::new(JobCache::new()),
            updates_tx,
            config(),
            token.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(12)).await;
        token.cancel();
        handle.await.unwrap().unwrap();
        assert!(updates_rx.try_recv().is_err(), "nothing must be submitted");
    }
}
