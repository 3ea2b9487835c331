//! Semaphore creation, wait, and signal types.

use ash::vk;

#[derive(Debug, Clone)]
pub enum SemaphoreExtension {
    /// Mirrors `VkSemaphoreTypeCreateInfo`.
    TypeInfo {
        semaphore_type: vk::SemaphoreType,
        initial_value: u64,
    },
}

/// Mirrors `VkSemaphoreCreateInfo`. Without a `TypeInfo` chain member the
/// semaphore is a plain binary one.
#[derive(Debug, Clone, Default)]
pub struct SemaphoreDescription {
    pub flags: vk::SemaphoreCreateFlags,
    pub chain: Vec<SemaphoreExtension>,
}

impl SemaphoreDescription {
    pub fn timeline(initial_value: u64) -> Self {
        Self {
            flags: vk::SemaphoreCreateFlags::empty(),
            chain: vec![SemaphoreExtension::TypeInfo {
                semaphore_type: vk::SemaphoreType::TIMELINE,
                initial_value,
            }],
        }
    }
}

/// Mirrors `VkSemaphoreWaitInfo`. `semaphores` and `values` are parallel.
#[derive(Debug, Clone, Default)]
pub struct SemaphoreWaitInfo {
    pub flags: vk::SemaphoreWaitFlags,
    pub semaphores: Vec<vk::Semaphore>,
    pub values: Vec<u64>,
}

/// Mirrors `VkSemaphoreSignalInfo`.
#[derive(Debug, Clone, Copy)]
pub struct SemaphoreSignalInfo {
    pub semaphore: vk::Semaphore,
    pub value: u64,
}
