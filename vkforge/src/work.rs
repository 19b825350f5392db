// Work submission batches (spec §3/§4.6's `Work`). Grounded in the
// teacher's `Renderer::submit_frame`, generalised so a caller can build
// up an arbitrary wait/signal set instead of the teacher's
// hard-coded-per-frame pair of semaphores.
//
// vkforge contributors

use ash::vk;

use crate::command::CommandBuffer;
use crate::device::{LogicalDevice, WorkQueue};
use crate::{Error, Result};

/// One submission to a `WorkQueue`: the command buffers to execute plus
/// the semaphores it must wait on and signal (spec §3's `Work`).
/// Borrows nothing -- every command buffer it references is marked
/// `Pending` as it is added, so the caller cannot accidentally reset or
/// re-begin a buffer this `Work` is about to submit.
#[derive(Default)]
pub struct Work {
    command_buffers: Vec<vk::CommandBuffer>,
    wait: Vec<(vk::Semaphore, vk::PipelineStageFlags)>,
    signal: Vec<vk::Semaphore>,
}

impl Work {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `cbuf` to the batch, transitioning it `Executable ->
    /// Pending` (spec §4.5's state machine).
    pub fn add_command_buffer(&mut self, cbuf: &mut CommandBuffer) -> Result<&mut Self> {
        cbuf.mark_pending()?;
        self.command_buffers.push(cbuf.raw());
        Ok(self)
    }

    pub fn wait_on(&mut self, semaphore: vk::Semaphore, stage: vk::PipelineStageFlags) -> &mut Self {
        self.wait.push((semaphore, stage));
        self
    }

    pub fn signal(&mut self, semaphore: vk::Semaphore) -> &mut Self {
        self.signal.push(semaphore);
        self
    }

    /// Submits the batch to `queue`. `fence`, if not null, is signalled
    /// once every command buffer in the batch has finished executing
    /// (spec §3's `Fence`).
    pub fn submit(&self, device: &LogicalDevice, queue: WorkQueue, fence: vk::Fence) -> Result<()> {
        let wait_semaphores: Vec<vk::Semaphore> = self.wait.iter().map(|(s, _)| *s).collect();
        let wait_stages: Vec<vk::PipelineStageFlags> = self.wait.iter().map(|(_, s)| *s).collect();

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&self.command_buffers)
            .signal_semaphores(&self.signal)
            .build();

        unsafe {
            device
                .raw()
                .queue_submit(queue.raw(), &[submit_info], fence)
                .map_err(Error::from)
        }
    }
}

/// Submits several `Work` batches that share a queue family together, in
/// one `vkQueueSubmit` call (spec §4.6's "Batch submission": multiple
/// `Work` entries on the same queue family submitted as a contiguous
/// array rather than one call per batch). `fence` is signalled once
/// every batch in `batches` has finished executing.
pub fn submit_batch(
    device: &LogicalDevice,
    queue: WorkQueue,
    batches: &[Work],
    fence: vk::Fence,
) -> Result<()> {
    let wait_semaphores: Vec<Vec<vk::Semaphore>> = batches
        .iter()
        .map(|w| w.wait.iter().map(|(s, _)| *s).collect())
        .collect();
    let wait_stages: Vec<Vec<vk::PipelineStageFlags>> = batches
        .iter()
        .map(|w| w.wait.iter().map(|(_, s)| *s).collect())
        .collect();

    let submit_infos: Vec<vk::SubmitInfo> = batches
        .iter()
        .enumerate()
        .map(|(i, w)| {
            vk::SubmitInfo::builder()
                .wait_semaphores(&wait_semaphores[i])
                .wait_dst_stage_mask(&wait_stages[i])
                .command_buffers(&w.command_buffers)
                .signal_semaphores(&w.signal)
                .build()
        })
        .collect();

    unsafe {
        device
            .raw()
            .queue_submit(queue.raw(), &submit_infos, fence)
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_methods_accumulate_in_order() {
        let mut work = Work::new();
        work.wait_on(vk::Semaphore::null(), vk::PipelineStageFlags::TOP_OF_PIPE);
        work.signal(vk::Semaphore::null());
        assert_eq!(work.wait.len(), 1);
        assert_eq!(work.signal.len(), 1);
        assert_eq!(work.command_buffers.len(), 0);
    }
}
