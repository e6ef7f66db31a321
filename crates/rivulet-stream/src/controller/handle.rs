use rivulet_core::MediaType;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{StreamError, StreamResult},
    registry::ControllerId,
    types::Adaptation,
};

/// Requests accepted by a running buffer controller.
#[derive(Debug)]
pub enum ControllerCommand {
    /// Playback moved to the given time.
    Seek(f64),
    /// Resume scheduling.
    Play,
    /// Re-evaluate whether scheduling is still required.
    Pause,
    /// Abort transfers and stop scheduling; `Play` resumes.
    Stop,
    /// Tear the controller down.
    Reset,
    /// Swap the set of representations (e.g. another language).
    SwitchAdaptation(Adaptation),
}

/// Owner side of a spawned [`BufferController`](super::BufferController).
pub struct ControllerHandle {
    pub(super) id: ControllerId,
    pub(super) media: MediaType,
    pub(super) commands: mpsc::Sender<ControllerCommand>,
    pub(super) cancel: CancellationToken,
    pub(super) task: JoinHandle<StreamResult<()>>,
}

impl ControllerHandle {
    pub fn id(&self) -> ControllerId {
        self.id
    }

    pub fn media(&self) -> MediaType {
        self.media
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// # Errors
    ///
    /// [`StreamError::Stopped`] if the controller task has ended.
    pub async fn send(&self, command: ControllerCommand) -> StreamResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| StreamError::Stopped)
    }

    /// # Errors
    ///
    /// [`StreamError::Stopped`] if the controller task has ended.
    pub async fn seek(&self, time: f64) -> StreamResult<()> {
        self.send(ControllerCommand::Seek(time)).await
    }

    /// # Errors
    ///
    /// [`StreamError::Stopped`] if the controller task has ended.
    pub async fn play(&self) -> StreamResult<()> {
        self.send(ControllerCommand::Play).await
    }

    /// # Errors
    ///
    /// [`StreamError::Stopped`] if the controller task has ended.
    pub async fn pause(&self) -> StreamResult<()> {
        self.send(ControllerCommand::Pause).await
    }

    /// # Errors
    ///
    /// [`StreamError::Stopped`] if the controller task has ended.
    pub async fn stop(&self) -> StreamResult<()> {
        self.send(ControllerCommand::Stop).await
    }

    /// # Errors
    ///
    /// [`StreamError::Stopped`] if the controller task has ended.
    pub async fn switch_adaptation(&self, adaptation: Adaptation) -> StreamResult<()> {
        self.send(ControllerCommand::SwitchAdaptation(adaptation))
            .await
    }

    /// Tear down through the command queue and wait for the task.
    ///
    /// # Errors
    ///
    /// The terminal error the controller stopped on, if any.
    pub async fn reset(self) -> StreamResult<()> {
        let _ = self.commands.send(ControllerCommand::Reset).await;
        self.join().await
    }

    /// Cancel the task immediately and wait for it.
    ///
    /// # Errors
    ///
    /// The terminal error the controller stopped on, if any.
    pub async fn shutdown(self) -> StreamResult<()> {
        self.cancel.cancel();
        self.join().await
    }

    async fn join(self) -> StreamResult<()> {
        self.task.await.map_err(|_| StreamError::Stopped)?
    }
}
