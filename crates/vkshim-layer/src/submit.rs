//! Queue submission rewriting for emulated timelines.
//!
//! The driver only understands binary semaphores, so each timeline wait or
//! signal in a batch is substituted:
//!
//! * A wait already satisfied by the host-side payload is dropped outright.
//!   An unsatisfied wait is replaced by a pooled binary semaphore; the host
//!   blocks until the payload reaches the target, then submits a signal-only
//!   batch for that binary semaphore, all before the rewritten batches are
//!   handed to the driver. The driver therefore never waits on a semaphore
//!   whose signal is not already queued.
//! * A timeline signal is removed from the batch and deferred: a fence
//!   covers the rewritten submission, and a watcher thread advances the
//!   payload once the fence retires, which also returns the substituted
//!   binary semaphores to the pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use ash::vk;
use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};
use vkshim_types::submit::{SubmitBatch, SubmitBatch2, SubmitExtension};

use crate::chain;
use crate::driver::DriverDispatch;
use crate::error::{ShimError, ShimResult};
use crate::registry::HandleRegistry;
use crate::timeline::{TimelineSemaphores, TimelineState, WaitPoint};

/// Per-device recycling pool for the binary semaphores substituted into
/// rewritten batches.
pub struct BinarySemaphorePool {
    free: Mutex<HashMap<vk::Device, Vec<vk::Semaphore>>>,
    cap: usize,
}

impl BinarySemaphorePool {
    pub fn new(cap: usize) -> Self {
        Self {
            free: Mutex::new(HashMap::new()),
            cap,
        }
    }

    pub fn acquire(
        &self,
        driver: &dyn DriverDispatch,
        device: vk::Device,
    ) -> ShimResult<vk::Semaphore> {
        let recycled = self.free.lock().get_mut(&device).and_then(Vec::pop);
        match recycled {
            Some(semaphore) => Ok(semaphore),
            None => driver
                .create_binary_semaphore(device)
                .map_err(ShimError::from),
        }
    }

    /// Returns a semaphore to the pool, destroying it instead once the
    /// per-device cap is reached.
    pub fn recycle(&self, driver: &dyn DriverDispatch, device: vk::Device, semaphore: vk::Semaphore) {
        let pooled = {
            let mut free = self.free.lock();
            let list = free.entry(device).or_default();
            if list.len() < self.cap {
                list.push(semaphore);
                true
            } else {
                false
            }
        };
        if !pooled {
            driver.destroy_semaphore(device, semaphore);
        }
    }

    pub fn pooled_count(&self, device: vk::Device) -> usize {
        self.free.lock().get(&device).map_or(0, Vec::len)
    }

    pub fn cleanup_device(&self, driver: &dyn DriverDispatch, device: vk::Device) {
        let semaphores = self.free.lock().remove(&device);
        if let Some(semaphores) = semaphores {
            for semaphore in semaphores {
                driver.destroy_semaphore(device, semaphore);
            }
        }
    }
}

enum CompletionJob {
    Retire {
        device: vk::Device,
        fence: vk::Fence,
        owns_fence: bool,
        signals: Vec<(Arc<TimelineState>, u64)>,
        recycle: Vec<vk::Semaphore>,
    },
    Shutdown,
}

/// Dedicated thread that waits on submission fences and retires the
/// deferred timeline work they cover.
pub struct CompletionWatcher {
    tx: Sender<CompletionJob>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CompletionWatcher {
    pub fn spawn(driver: Arc<dyn DriverDispatch>, pool: Arc<BinarySemaphorePool>) -> Self {
        let (tx, rx) = unbounded();
        let thread = thread::spawn(move || {
            for job in rx {
                match job {
                    CompletionJob::Shutdown => break,
                    CompletionJob::Retire {
                        device,
                        fence,
                        owns_fence,
                        signals,
                        recycle,
                    } => {
                        if let Err(e) = driver.wait_for_fences(device, &[fence], u64::MAX) {
                            warn!(error = ?e, "fence wait failed, retiring submission anyway");
                        }
                        for (state, value) in signals {
                            if let Err(e) = state.signal(value) {
                                warn!(error = %e, value, "deferred timeline signal rejected");
                            }
                        }
                        for semaphore in recycle {
                            pool.recycle(driver.as_ref(), device, semaphore);
                        }
                        if owns_fence {
                            driver.destroy_fence(device, fence);
                        }
                    }
                }
            }
        });
        Self {
            tx,
            thread: Some(thread),
        }
    }

    fn retire(&self, job: CompletionJob) {
        if self.tx.send(job).is_err() {
            warn!("completion watcher is gone, dropping retirement job");
        }
    }
}

impl Drop for CompletionWatcher {
    fn drop(&mut self) {
        let _ = self.tx.send(CompletionJob::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

struct PendingWait {
    state: Arc<TimelineState>,
    target: u64,
    binary: vk::Semaphore,
}

/// Rewrites timeline waits/signals out of `batches` and submits the result.
/// Binary semaphores acquired for the rewrite go back to the pool if the
/// submission fails partway.
#[allow(clippy::too_many_arguments)]
pub fn rewrite_and_submit(
    driver: &dyn DriverDispatch,
    registry: &HandleRegistry,
    timelines: &TimelineSemaphores,
    pool: &BinarySemaphorePool,
    watcher: &CompletionWatcher,
    queue: vk::Queue,
    batches: Vec<SubmitBatch>,
    fence: Option<vk::Fence>,
) -> ShimResult<()> {
    let device = batches
        .iter()
        .flat_map(|b| b.command_buffers.iter())
        .find_map(|cb| registry.device_for_command_buffer(*cb));

    let mut acquired: Vec<vk::Semaphore> = Vec::new();
    let result = rewrite_and_submit_inner(
        driver,
        timelines,
        pool,
        watcher,
        queue,
        batches,
        fence,
        device,
        &mut acquired,
    );
    if result.is_err() {
        // Acquisition only happens once a device is known.
        if let Some(device) = device {
            for semaphore in acquired.drain(..) {
                pool.recycle(driver, device, semaphore);
            }
        }
    }
    result
}

/// On success `recycle` is drained into the retirement job; on error the
/// caller returns its contents to the pool.
#[allow(clippy::too_many_arguments)]
fn rewrite_and_submit_inner(
    driver: &dyn DriverDispatch,
    timelines: &TimelineSemaphores,
    pool: &BinarySemaphorePool,
    watcher: &CompletionWatcher,
    queue: vk::Queue,
    batches: Vec<SubmitBatch>,
    fence: Option<vk::Fence>,
    device: Option<vk::Device>,
    recycle: &mut Vec<vk::Semaphore>,
) -> ShimResult<()> {
    let mut forwarded = Vec::with_capacity(batches.len());
    let mut pending_waits: Vec<PendingWait> = Vec::new();
    let mut deferred_signals: Vec<(Arc<TimelineState>, u64)> = Vec::new();

    for mut batch in batches {
        let timeline_values = chain::extract_one(
            &mut batch.chain,
            |m| match m {
                SubmitExtension::TimelineValues {
                    wait_values,
                    signal_values,
                } => Some((wait_values.clone(), signal_values.clone())),
                _ => None,
            },
            "timeline submit values",
        );
        let Some((wait_values, signal_values)) = timeline_values else {
            forwarded.push(batch);
            continue;
        };

        if !wait_values.is_empty() {
            let mut kept_semaphores = Vec::with_capacity(batch.wait_semaphores.len());
            let mut kept_masks = Vec::with_capacity(batch.wait_semaphores.len());
            for (index, semaphore) in batch.wait_semaphores.iter().enumerate() {
                let mask = batch
                    .wait_dst_stage_masks
                    .get(index)
                    .copied()
                    .unwrap_or(vk::PipelineStageFlags::TOP_OF_PIPE);
                match timelines.state(*semaphore) {
                    None => {
                        kept_semaphores.push(*semaphore);
                        kept_masks.push(mask);
                    }
                    Some(state) => {
                        let target = wait_values.get(index).copied().unwrap_or(0);
                        if state.value() >= target {
                            // Already satisfied on the host; drop the wait.
                            continue;
                        }
                        let device = device.ok_or(ShimError::Initialization(
                            "timeline submission needs a resolvable device",
                        ))?;
                        let binary = pool.acquire(driver, device)?;
                        pending_waits.push(PendingWait {
                            state,
                            target,
                            binary,
                        });
                        recycle.push(binary);
                        kept_semaphores.push(binary);
                        kept_masks.push(mask);
                    }
                }
            }
            batch.wait_semaphores = kept_semaphores;
            batch.wait_dst_stage_masks = kept_masks;
        }

        if !signal_values.is_empty() {
            let mut kept_signals = Vec::with_capacity(batch.signal_semaphores.len());
            for (index, semaphore) in batch.signal_semaphores.iter().enumerate() {
                match timelines.state(*semaphore) {
                    None => kept_signals.push(*semaphore),
                    Some(state) => {
                        let value = signal_values.get(index).copied().unwrap_or(0);
                        deferred_signals.push((state, value));
                    }
                }
            }
            batch.signal_semaphores = kept_signals;
        }

        forwarded.push(batch);
    }

    // A batch may not wait on a payload value that only this call's own
    // deferred signals would produce: those signals fire after fence
    // retirement, so the host wait below would never return.
    for pending in &pending_waits {
        let self_satisfied = deferred_signals
            .iter()
            .any(|(state, value)| Arc::ptr_eq(state, &pending.state) && *value >= pending.target);
        if self_satisfied {
            return Err(ShimError::Validation(
                "submission waits on a timeline value it signals itself",
            ));
        }
    }

    // Complete every substituted wait before the rewritten batches go out:
    // block on the host payload, then queue the binary signal. The block is
    // unbounded, matching an infinite-timeout host wait; the signal has to
    // arrive from another thread or an earlier submission.
    for pending in &pending_waits {
        WaitPoint::new(pending.state.clone(), pending.target).wait_until(None)?;
        let signal_only = SubmitBatch {
            signal_semaphores: vec![pending.binary],
            ..Default::default()
        };
        driver
            .queue_submit(queue, &[signal_only], None)
            .map_err(ShimError::from)?;
    }

    let needs_watch = !deferred_signals.is_empty() || !recycle.is_empty();
    let (submit_fence, watch) = if needs_watch {
        let device = device.ok_or(ShimError::Initialization(
            "timeline submission needs a resolvable device",
        ))?;
        match fence {
            Some(fence) => (Some(fence), Some((device, fence, false))),
            None => {
                let fence = driver.create_fence(device).map_err(ShimError::from)?;
                (Some(fence), Some((device, fence, true)))
            }
        }
    } else {
        (fence, None)
    };

    driver
        .queue_submit(queue, &forwarded, submit_fence)
        .map_err(ShimError::from)?;

    if let Some((device, fence, owns_fence)) = watch {
        debug!(
            signals = deferred_signals.len(),
            recycled = recycle.len(),
            "deferring timeline completion to fence retirement"
        );
        watcher.retire(CompletionJob::Retire {
            device,
            fence,
            owns_fence,
            signals: deferred_signals,
            recycle: std::mem::take(recycle),
        });
    }
    Ok(())
}

/// Flattens `VkSubmitInfo2`-shaped batches into the legacy shape, folding
/// timeline payload values back into a chain member and narrowing the
/// 64-bit stage masks.
pub fn normalize_submit2(batches: Vec<SubmitBatch2>) -> Vec<SubmitBatch> {
    batches
        .into_iter()
        .map(|batch| {
            let mut out = SubmitBatch {
                wait_semaphores: batch.wait_semaphores.iter().map(|s| s.semaphore).collect(),
                wait_dst_stage_masks: batch
                    .wait_semaphores
                    .iter()
                    .map(|s| narrow_stage_mask(s.stage_mask))
                    .collect(),
                command_buffers: batch
                    .command_buffers
                    .iter()
                    .map(|c| c.command_buffer)
                    .collect(),
                signal_semaphores: batch.signal_semaphores.iter().map(|s| s.semaphore).collect(),
                chain: Vec::new(),
            };
            let wait_values: Vec<u64> = batch.wait_semaphores.iter().map(|s| s.value).collect();
            let signal_values: Vec<u64> = batch.signal_semaphores.iter().map(|s| s.value).collect();
            if wait_values.iter().chain(&signal_values).any(|v| *v != 0) {
                out.chain.push(SubmitExtension::TimelineValues {
                    wait_values,
                    signal_values,
                });
            }
            if batch.flags.contains(vk::SubmitFlags::PROTECTED) {
                out.chain.push(SubmitExtension::Protected { protected: true });
            }
            out
        })
        .collect()
}

pub fn narrow_stage_mask(mask: vk::PipelineStageFlags2) -> vk::PipelineStageFlags {
    vk::PipelineStageFlags::from_raw(mask.as_raw() as u32)
}

#[cfg(test)]
mod tests {
    use ash::vk::Handle;

    use super::*;

    #[test]
    fn submit2_with_values_gains_timeline_chain() {
        use vkshim_types::submit::{CommandBufferSubmit, SemaphoreSubmit};

        let batches = normalize_submit2(vec![SubmitBatch2 {
            flags: vk::SubmitFlags::empty(),
            wait_semaphores: vec![SemaphoreSubmit {
                semaphore: vk::Semaphore::from_raw(1),
                value: 5,
                stage_mask: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                device_index: 0,
            }],
            command_buffers: vec![CommandBufferSubmit {
                command_buffer: vk::CommandBuffer::from_raw(2),
                device_mask: 0,
            }],
            signal_semaphores: vec![],
        }]);

        assert_eq!(batches.len(), 1);
        assert_eq!(
            batches[0].wait_dst_stage_masks[0],
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
        assert!(matches!(
            batches[0].chain.as_slice(),
            [SubmitExtension::TimelineValues { wait_values, .. }] if wait_values == &[5]
        ));
    }

    #[test]
    fn submit2_without_values_stays_plain() {
        let batches = normalize_submit2(vec![SubmitBatch2::default()]);
        assert!(batches[0].chain.is_empty());
    }

    #[test]
    fn stage_mask_narrowing_keeps_low_bits() {
        assert_eq!(
            narrow_stage_mask(vk::PipelineStageFlags2::VERTEX_SHADER),
            vk::PipelineStageFlags::VERTEX_SHADER
        );
    }
}
