mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ash::vk::{self, Handle};
use common::{device, mock_layer, one_command_buffer, queue};
use vkshim_layer::ShimError;
use vkshim_types::submit::{
    CommandBufferSubmit, SemaphoreSubmit, SubmitBatch, SubmitBatch2, SubmitExtension,
};
use vkshim_types::sync::SemaphoreDescription;

/// Polls until `predicate` holds, failing after a generous deadline. The
/// completion watcher retires fences on its own thread.
fn wait_for(mut predicate: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !predicate() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn plain_batches_pass_through_untouched() {
    let (driver, layer) = mock_layer();
    let command_buffer = one_command_buffer(&layer);
    let binary = layer
        .create_semaphore(device(), &SemaphoreDescription::default())
        .unwrap();

    layer
        .queue_submit(
            queue(),
            vec![SubmitBatch {
                wait_semaphores: vec![binary],
                wait_dst_stage_masks: vec![vk::PipelineStageFlags::TOP_OF_PIPE],
                command_buffers: vec![command_buffer],
                signal_semaphores: vec![binary],
                chain: vec![],
            }],
            None,
        )
        .unwrap();

    let submits = driver.submits.lock();
    assert_eq!(submits.len(), 1);
    assert_eq!(submits[0].queue, queue());
    assert_eq!(submits[0].batches[0].wait_semaphores, vec![binary]);
    assert_eq!(submits[0].batches[0].signal_semaphores, vec![binary]);
    assert_eq!(submits[0].fence, None);
}

#[test]
fn satisfied_timeline_wait_is_dropped() {
    let (driver, layer) = mock_layer();
    let command_buffer = one_command_buffer(&layer);
    let timeline = layer
        .create_semaphore(device(), &SemaphoreDescription::timeline(10))
        .unwrap();

    layer
        .queue_submit(
            queue(),
            vec![SubmitBatch {
                wait_semaphores: vec![timeline],
                wait_dst_stage_masks: vec![vk::PipelineStageFlags::TOP_OF_PIPE],
                command_buffers: vec![command_buffer],
                signal_semaphores: vec![],
                chain: vec![SubmitExtension::TimelineValues {
                    wait_values: vec![5],
                    signal_values: vec![],
                }],
            }],
            None,
        )
        .unwrap();

    let submits = driver.submits.lock();
    assert_eq!(submits.len(), 1);
    assert!(submits[0].batches[0].wait_semaphores.is_empty());
    assert!(submits[0].batches[0].chain.is_empty());
}

#[test]
fn unsatisfied_wait_is_substituted_and_presignaled() {
    let (driver, layer) = mock_layer();
    let layer = Arc::new(layer);
    let command_buffer = one_command_buffer(&layer);
    let timeline = layer
        .create_semaphore(device(), &SemaphoreDescription::timeline(0))
        .unwrap();

    let submitter = {
        let layer = layer.clone();
        thread::spawn(move || {
            layer.queue_submit(
                queue(),
                vec![SubmitBatch {
                    wait_semaphores: vec![timeline],
                    wait_dst_stage_masks: vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
                    command_buffers: vec![command_buffer],
                    signal_semaphores: vec![],
                    chain: vec![SubmitExtension::TimelineValues {
                        wait_values: vec![1],
                        signal_values: vec![],
                    }],
                }],
                None,
            )
        })
    };

    // The submission blocks until the host payload reaches the target.
    thread::sleep(Duration::from_millis(20));
    assert_eq!(driver.submit_count(), 0);
    layer
        .signal_semaphore(&vkshim_types::sync::SemaphoreSignalInfo {
            semaphore: timeline,
            value: 1,
        })
        .unwrap();
    submitter.join().unwrap().unwrap();

    let submits = driver.submits.lock();
    assert_eq!(submits.len(), 2);
    // First a signal-only batch for the substituted binary semaphore.
    assert!(submits[0].batches[0].command_buffers.is_empty());
    let binary = submits[0].batches[0].signal_semaphores[0];
    assert_ne!(binary, timeline);
    // Then the rewritten batch waiting on that binary semaphore.
    assert_eq!(submits[1].batches[0].wait_semaphores, vec![binary]);
    assert_eq!(
        submits[1].batches[0].wait_dst_stage_masks,
        vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT]
    );
    assert!(submits[1].fence.is_some());
    drop(submits);

    // Retirement returns the binary semaphore to the pool.
    wait_for(|| layer.semaphore_pool().pooled_count(device()) == 1);
}

#[test]
fn timeline_signal_is_deferred_to_fence_retirement() {
    let (driver, layer) = mock_layer();
    let command_buffer = one_command_buffer(&layer);
    let timeline = layer
        .create_semaphore(device(), &SemaphoreDescription::timeline(0))
        .unwrap();

    layer
        .queue_submit(
            queue(),
            vec![SubmitBatch {
                wait_semaphores: vec![],
                wait_dst_stage_masks: vec![],
                command_buffers: vec![command_buffer],
                signal_semaphores: vec![timeline],
                chain: vec![SubmitExtension::TimelineValues {
                    wait_values: vec![],
                    signal_values: vec![8],
                }],
            }],
            None,
        )
        .unwrap();

    {
        let submits = driver.submits.lock();
        assert_eq!(submits.len(), 1);
        // The timeline handle never reaches the driver's signal list.
        assert!(submits[0].batches[0].signal_semaphores.is_empty());
        // A fence was synthesized to track completion.
        assert!(submits[0].fence.is_some());
    }

    // The mock retires fences instantly; the watcher then advances the
    // payload and destroys the synthesized fence.
    wait_for(|| layer.get_semaphore_counter_value(timeline) == Ok(8));
    wait_for(|| !driver.destroyed_fences.lock().is_empty());
}

#[test]
fn caller_fence_is_reused_and_kept() {
    let (driver, layer) = mock_layer();
    let command_buffer = one_command_buffer(&layer);
    let timeline = layer
        .create_semaphore(device(), &SemaphoreDescription::timeline(0))
        .unwrap();
    let caller_fence = vk::Fence::from_raw(0xF0);

    layer
        .queue_submit(
            queue(),
            vec![SubmitBatch {
                command_buffers: vec![command_buffer],
                signal_semaphores: vec![timeline],
                chain: vec![SubmitExtension::TimelineValues {
                    wait_values: vec![],
                    signal_values: vec![3],
                }],
                ..SubmitBatch::default()
            }],
            Some(caller_fence),
        )
        .unwrap();

    assert_eq!(driver.submits.lock()[0].fence, Some(caller_fence));
    wait_for(|| layer.get_semaphore_counter_value(timeline) == Ok(3));
    // The caller's fence must survive retirement.
    assert!(driver.destroyed_fences.lock().is_empty());
}

#[test]
fn mixed_batch_keeps_binary_semaphores() {
    let (driver, layer) = mock_layer();
    let command_buffer = one_command_buffer(&layer);
    let timeline = layer
        .create_semaphore(device(), &SemaphoreDescription::timeline(1))
        .unwrap();
    let binary = layer
        .create_semaphore(device(), &SemaphoreDescription::default())
        .unwrap();

    layer
        .queue_submit(
            queue(),
            vec![SubmitBatch {
                wait_semaphores: vec![timeline, binary],
                wait_dst_stage_masks: vec![
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::VERTEX_SHADER,
                ],
                command_buffers: vec![command_buffer],
                signal_semaphores: vec![binary, timeline],
                chain: vec![SubmitExtension::TimelineValues {
                    wait_values: vec![1, 0],
                    signal_values: vec![0, 2],
                }],
            }],
            None,
        )
        .unwrap();

    let submits = driver.submits.lock();
    let batch = &submits[0].batches[0];
    // Satisfied timeline wait dropped, binary wait preserved with its mask.
    assert_eq!(batch.wait_semaphores, vec![binary]);
    assert_eq!(
        batch.wait_dst_stage_masks,
        vec![vk::PipelineStageFlags::VERTEX_SHADER]
    );
    // Timeline signal deferred, binary signal preserved.
    assert_eq!(batch.signal_semaphores, vec![binary]);
    drop(submits);

    wait_for(|| layer.get_semaphore_counter_value(timeline) == Ok(2));
}

#[test]
fn submit2_batches_are_flattened() {
    let (driver, layer) = mock_layer();
    let command_buffer = one_command_buffer(&layer);
    let timeline = layer
        .create_semaphore(device(), &SemaphoreDescription::timeline(4))
        .unwrap();

    layer
        .queue_submit2(
            queue(),
            vec![SubmitBatch2 {
                flags: vk::SubmitFlags::empty(),
                wait_semaphores: vec![SemaphoreSubmit {
                    semaphore: timeline,
                    value: 4,
                    stage_mask: vk::PipelineStageFlags2::FRAGMENT_SHADER,
                    device_index: 0,
                }],
                command_buffers: vec![CommandBufferSubmit {
                    command_buffer,
                    device_mask: 0,
                }],
                signal_semaphores: vec![],
            }],
            None,
        )
        .unwrap();

    let submits = driver.submits.lock();
    assert_eq!(submits.len(), 1);
    // The wait was satisfied, so it was rewritten away entirely.
    assert!(submits[0].batches[0].wait_semaphores.is_empty());
    assert_eq!(submits[0].batches[0].command_buffers, vec![command_buffer]);
}

#[test]
fn self_dependent_wait_is_rejected() {
    let (driver, layer) = mock_layer();
    let command_buffer = one_command_buffer(&layer);
    let timeline = layer
        .create_semaphore(device(), &SemaphoreDescription::timeline(0))
        .unwrap();

    // The second batch waits for a value only the first batch's deferred
    // signal would produce; blocking for it would never return.
    let result = layer.queue_submit(
        queue(),
        vec![
            SubmitBatch {
                command_buffers: vec![command_buffer],
                signal_semaphores: vec![timeline],
                chain: vec![SubmitExtension::TimelineValues {
                    wait_values: vec![],
                    signal_values: vec![1],
                }],
                ..SubmitBatch::default()
            },
            SubmitBatch {
                wait_semaphores: vec![timeline],
                wait_dst_stage_masks: vec![vk::PipelineStageFlags::TOP_OF_PIPE],
                command_buffers: vec![command_buffer],
                chain: vec![SubmitExtension::TimelineValues {
                    wait_values: vec![1],
                    signal_values: vec![],
                }],
                ..SubmitBatch::default()
            },
        ],
        None,
    );

    assert!(matches!(result, Err(ShimError::Validation(_))));
    assert_eq!(driver.submit_count(), 0);
    // The substituted binary went back to the pool instead of leaking.
    assert_eq!(layer.semaphore_pool().pooled_count(device()), 1);
}

#[test]
fn fence_creation_failure_returns_binaries_to_the_pool() {
    let (driver, layer) = mock_layer();
    let layer = Arc::new(layer);
    let command_buffer = one_command_buffer(&layer);
    let timeline = layer
        .create_semaphore(device(), &SemaphoreDescription::timeline(0))
        .unwrap();
    driver.fail_fence_creation.store(true, Ordering::Relaxed);

    let submitter = {
        let layer = layer.clone();
        thread::spawn(move || {
            layer.queue_submit(
                queue(),
                vec![SubmitBatch {
                    wait_semaphores: vec![timeline],
                    wait_dst_stage_masks: vec![vk::PipelineStageFlags::TOP_OF_PIPE],
                    command_buffers: vec![command_buffer],
                    signal_semaphores: vec![],
                    chain: vec![SubmitExtension::TimelineValues {
                        wait_values: vec![1],
                        signal_values: vec![],
                    }],
                }],
                None,
            )
        })
    };
    thread::sleep(Duration::from_millis(20));
    layer
        .signal_semaphore(&vkshim_types::sync::SemaphoreSignalInfo {
            semaphore: timeline,
            value: 1,
        })
        .unwrap();

    let result = submitter.join().unwrap();
    assert!(matches!(result, Err(ShimError::Driver(_))));
    // Only the signal-only batch for the substituted wait went out.
    assert_eq!(driver.submit_count(), 1);
    assert_eq!(layer.semaphore_pool().pooled_count(device()), 1);
}

#[test]
fn pool_reuses_retired_binary_semaphores() {
    let (driver, layer) = mock_layer();
    let layer = Arc::new(layer);
    let command_buffer = one_command_buffer(&layer);
    let timeline = layer
        .create_semaphore(device(), &SemaphoreDescription::timeline(0))
        .unwrap();

    for round in 1..=2u64 {
        let submitter = {
            let layer = layer.clone();
            thread::spawn(move || {
                layer.queue_submit(
                    queue(),
                    vec![SubmitBatch {
                        wait_semaphores: vec![timeline],
                        wait_dst_stage_masks: vec![vk::PipelineStageFlags::TOP_OF_PIPE],
                        command_buffers: vec![command_buffer],
                        signal_semaphores: vec![],
                        chain: vec![SubmitExtension::TimelineValues {
                            wait_values: vec![round],
                            signal_values: vec![],
                        }],
                    }],
                    None,
                )
            })
        };
        thread::sleep(Duration::from_millis(10));
        layer
            .signal_semaphore(&vkshim_types::sync::SemaphoreSignalInfo {
                semaphore: timeline,
                value: round,
            })
            .unwrap();
        submitter.join().unwrap().unwrap();
        wait_for(|| layer.semaphore_pool().pooled_count(device()) == 1);
    }

    // One binary for the timeline handle itself, one pooled substitute.
    assert_eq!(driver.created_semaphores.lock().len(), 2);
}
