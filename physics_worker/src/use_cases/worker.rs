// Worker simulation host.
//
// `worker_task` owns a `Worker` and drains the command channel one message at a time.
// Commands that arrive before `INIT` are queued and replayed in arrival order once the
// world exists. Handler failures never stop the loop; they are logged and reported
// back as `WorkerEvent::HandlerError`.

use super::types::{Frame, WorkerCommand, WorkerEvent};
use crate::domain::{SimulationState, WorkerError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub async fn worker_task(
    mut commands: mpsc::UnboundedReceiver<WorkerCommand>,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    let mut worker = Worker::default();
    while let Some(command) = commands.recv().await {
        for event in worker.handle(command) {
            if events.send(event).is_err() {
                debug!("event receiver dropped; stopping worker");
                return;
            }
        }
    }
    debug!("command channel closed; stopping worker");
}

#[derive(Default)]
pub struct Worker {
    state: Option<SimulationState>,
    pending: Vec<WorkerCommand>,
}

impl Worker {
    pub fn state(&self) -> Option<&SimulationState> {
        self.state.as_ref()
    }

    /// Commands waiting for `INIT`.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Process one command and return the events it produced, in emission order.
    pub fn handle(&mut self, command: WorkerCommand) -> Vec<WorkerEvent> {
        let mut events = Vec::new();
        match command {
            WorkerCommand::Init(config) => {
                if self.state.is_some() {
                    warn!("world re-initialized; previous simulation dropped");
                }
                info!(
                    gravity = ?config.gravity,
                    step_size = config.step_size,
                    max_sub_steps = config.max_sub_steps,
                    queued = self.pending.len(),
                    "world initialized"
                );
                let mut state = SimulationState::new(config);
                for queued in std::mem::take(&mut self.pending) {
                    dispatch(&mut state, queued, &mut events);
                }
                self.state = Some(state);
            }
            command => match self.state.as_mut() {
                Some(state) => dispatch(state, command, &mut events),
                None => {
                    debug!(topic = %command.topic(), "queued until init");
                    self.pending.push(command);
                }
            },
        }
        events
    }
}

fn dispatch(state: &mut SimulationState, command: WorkerCommand, events: &mut Vec<WorkerEvent>) {
    let topic = command.topic();
    if let Err(err) = apply(state, command, events) {
        warn!(topic = %topic, error = %err, "handler failed");
        events.push(WorkerEvent::HandlerError {
            topic: topic.into_owned(),
            message: err.to_string(),
        });
    }
}

fn apply(
    state: &mut SimulationState,
    command: WorkerCommand,
    events: &mut Vec<WorkerEvent>,
) -> Result<(), WorkerError> {
    match command {
        WorkerCommand::Init(_) => {}
        WorkerCommand::Step {
            mut buffers,
            elapsed,
            origin,
        } => {
            let output = state.step(elapsed, &mut buffers);
            events.extend(output.ray_hits.into_iter().map(WorkerEvent::RayHit));
            events.extend(output.contact_begins.into_iter().map(WorkerEvent::CollideBegin));
            events.extend(output.collisions.into_iter().map(WorkerEvent::Collide));
            events.extend(output.contact_ends.into_iter().map(WorkerEvent::CollideEnd));
            events.push(WorkerEvent::Frame(Frame {
                buffers,
                observations: output.observations,
                active: output.active,
                body_order: output.body_order,
                origin,
            }));
        }
        WorkerCommand::AddBodies { bodies } => {
            let count = bodies.len();
            for (id, params) in bodies {
                state.add_body(id, params)?;
            }
            debug!(bodies = count, total = state.body_count(), "bodies added");
        }
        WorkerCommand::RemoveBodies { ids } => {
            for id in &ids {
                state.remove_body(id)?;
            }
        }
        WorkerCommand::SetBody { id, value } => state.set_body(&id, value)?,
        WorkerCommand::ApplyBody { id, input } => state.apply_body(&id, input)?,
        WorkerCommand::WakeUp { id } => state.wake_up(&id)?,
        WorkerCommand::Sleep { id } => state.sleep(&id)?,
        WorkerCommand::AddConstraint(spec) => state.add_constraint(spec)?,
        WorkerCommand::RemoveConstraint { id } => state.remove_constraint(&id)?,
        WorkerCommand::EnableConstraint { id } => state.set_constraint_enabled(&id, true)?,
        WorkerCommand::DisableConstraint { id } => state.set_constraint_enabled(&id, false)?,
        WorkerCommand::EnableConstraintMotor { id } => state.set_motor_enabled(&id, true)?,
        WorkerCommand::DisableConstraintMotor { id } => state.set_motor_enabled(&id, false)?,
        WorkerCommand::SetConstraintMotorSpeed { id, speed } => {
            state.set_motor_speed(&id, speed)?
        }
        WorkerCommand::SetConstraintMotorMaxForce { id, max_force } => {
            state.set_motor_max_force(&id, max_force)?
        }
        WorkerCommand::AddSpring(spec) => state.add_spring(spec)?,
        WorkerCommand::RemoveSpring { id } => state.remove_spring(&id)?,
        WorkerCommand::SetSpring { id, value } => state.set_spring(&id, value)?,
        WorkerCommand::AddRaycastVehicle(spec) => state.add_vehicle(spec)?,
        WorkerCommand::RemoveRaycastVehicle { id } => state.remove_vehicle(&id)?,
        WorkerCommand::SetVehicleWheel { id, wheel, value } => {
            state.set_wheel(&id, wheel, value)?
        }
        WorkerCommand::AddRay(spec) => state.add_ray(spec)?,
        WorkerCommand::RemoveRay { id } => state.remove_ray(&id)?,
        WorkerCommand::Subscribe(spec) => state.subscribe(spec),
        WorkerCommand::Unsubscribe { id } => state.unsubscribe(id)?,
        WorkerCommand::SetWorld(value) => state.set_world(value),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BodyParams, BodyValue, EntityId, PoseBuffers, Shape, WorldConfig};

    fn ball(id: &str) -> (EntityId, BodyParams) {
        (
            EntityId::from(id),
            BodyParams::new(Shape::Sphere { radius: 0.5 })
                .with_mass(1.0)
                .at([0.0, 5.0, 0.0]),
        )
    }

    fn step(origin: Option<u64>) -> WorkerCommand {
        WorkerCommand::Step {
            buffers: PoseBuffers::default(),
            elapsed: None,
            origin,
        }
    }

    fn frame(events: Vec<WorkerEvent>) -> Frame {
        events
            .into_iter()
            .find_map(|event| match event {
                WorkerEvent::Frame(frame) => Some(frame),
                _ => None,
            })
            .expect("step emits a frame")
    }

    #[test]
    fn when_commands_arrive_before_init_then_they_replay_in_order_after_it() {
        let mut worker = Worker::default();

        assert!(worker.handle(WorkerCommand::AddBodies { bodies: vec![ball("a")] }).is_empty());
        assert!(worker.handle(WorkerCommand::AddBodies { bodies: vec![ball("b")] }).is_empty());
        assert_eq!(worker.pending_len(), 2);

        worker.handle(WorkerCommand::Init(WorldConfig::default()));
        let frame = frame(worker.handle(step(None)));

        assert_eq!(worker.pending_len(), 0);
        assert_eq!(
            frame.body_order,
            Some(vec![EntityId::from("a"), EntityId::from("b")])
        );
        assert_eq!(frame.buffers.len(), 2);
    }

    #[test]
    fn when_step_carries_an_origin_then_frame_echoes_it() {
        let mut worker = Worker::default();
        worker.handle(WorkerCommand::Init(WorldConfig::default()));
        worker.handle(WorkerCommand::AddBodies { bodies: vec![ball("a")] });

        let frame = frame(worker.handle(step(Some(41))));

        assert_eq!(frame.origin, Some(41));
        assert!(frame.active);
    }

    #[test]
    fn when_handler_targets_unknown_body_then_error_event_is_emitted_and_worker_continues() {
        let mut worker = Worker::default();
        worker.handle(WorkerCommand::Init(WorldConfig::default()));

        let events = worker.handle(WorkerCommand::SetBody {
            id: EntityId::from("ghost"),
            value: BodyValue::Mass(3.0),
        });

        match events.as_slice() {
            [WorkerEvent::HandlerError { topic, message }] => {
                assert_eq!(topic, "SET_MASS");
                assert!(message.contains("ghost"));
            }
            other => panic!("expected one handler error, got {other:?}"),
        }
        worker.handle(WorkerCommand::AddBodies { bodies: vec![ball("a")] });
        assert_eq!(worker.state().map(SimulationState::body_count), Some(1));
    }

    #[tokio::test]
    async fn when_task_runs_then_frames_flow_back_over_the_channel() {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(worker_task(command_rx, event_tx));

        command_tx
            .send(WorkerCommand::Init(WorldConfig::default()))
            .expect("worker alive");
        command_tx
            .send(WorkerCommand::AddBodies { bodies: vec![ball("a")] })
            .expect("worker alive");
        command_tx.send(step(Some(1))).expect("worker alive");

        match event_rx.recv().await {
            Some(WorkerEvent::Frame(frame)) => {
                assert_eq!(frame.origin, Some(1));
                assert_eq!(frame.buffers.len(), 1);
            }
            other => panic!("expected a frame, got {other:?}"),
        }

        drop(command_tx);
        task.await.expect("worker task exits cleanly");
    }
}
