//! # Deferred Commands
//!
//! Structural changes recorded while chunks are borrowed (inside a query
//! visitor) and applied later, in recording order.

use super::entity::EntityId;
use super::fragment::{FragmentData, FragmentId};
use super::world::World;
use crate::error::StoreResult;
use crate::memory::{Pool, StackAllocator, Template};

/// A structural change waiting to be applied.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Delete the entity.
    Delete(EntityId),
    /// Attach (or overwrite) a fragment.
    AddFragment(EntityId, FragmentData),
    /// Detach a fragment.
    RemoveFragment(EntityId, FragmentId),
    /// Change the instance count.
    SetInstanceCount(EntityId, u32),
}

impl Command {
    /// Target entity.
    #[must_use]
    pub const fn entity(&self) -> EntityId {
        match self {
            Self::Delete(e)
            | Self::AddFragment(e, _)
            | Self::RemoveFragment(e, _)
            | Self::SetInstanceCount(e, _) => *e,
        }
    }
}

/// Bounded, frame-scoped command recorder.
#[derive(Debug)]
pub struct CommandBuffer {
    stack: StackAllocator<Option<Command>>,
}

impl CommandBuffer {
    /// Creates a buffer holding at most `capacity` commands.
    ///
    /// # Panics
    ///
    /// Panics if capacity is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            stack: StackAllocator::new(capacity, &Template::Prototype(None)),
        }
    }

    /// Records a command.
    ///
    /// # Errors
    ///
    /// [`crate::AllocError::CapacityExceeded`] when the buffer is full.
    pub fn push(&mut self, command: Command) -> StoreResult<()> {
        self.stack.push_value(Some(command))?;
        Ok(())
    }

    /// Records a delete.
    ///
    /// # Errors
    ///
    /// As [`Self::push`].
    pub fn delete(&mut self, entity: EntityId) -> StoreResult<()> {
        self.push(Command::Delete(entity))
    }

    /// Records a fragment attach.
    ///
    /// # Errors
    ///
    /// As [`Self::push`].
    pub fn add_fragment(&mut self, entity: EntityId, data: FragmentData) -> StoreResult<()> {
        self.push(Command::AddFragment(entity, data))
    }

    /// Records a fragment detach.
    ///
    /// # Errors
    ///
    /// As [`Self::push`].
    pub fn remove_fragment(&mut self, entity: EntityId, fragment: FragmentId) -> StoreResult<()> {
        self.push(Command::RemoveFragment(entity, fragment))
    }

    /// Records an instance count change.
    ///
    /// # Errors
    ///
    /// As [`Self::push`].
    pub fn set_instance_count(&mut self, entity: EntityId, count: u32) -> StoreResult<()> {
        self.push(Command::SetInstanceCount(entity, count))
    }

    /// Pending commands.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    /// Returns `true` if nothing is pending.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Takes every pending command, oldest first, and empties the buffer.
    pub fn drain(&mut self) -> Vec<Command> {
        let commands = self
            .stack
            .as_mut_slice()
            .iter_mut()
            .filter_map(Option::take)
            .collect();
        self.stack.reset();
        commands
    }
}

impl World {
    /// Queues a command for the next [`Self::apply_deferred`] (run by
    /// [`Self::end_frame`]).
    ///
    /// # Errors
    ///
    /// [`crate::AllocError::CapacityExceeded`] when the queue is full.
    pub fn defer(&mut self, command: Command) -> StoreResult<()> {
        self.commands.push(command)
    }

    /// Pending deferred commands.
    #[inline]
    #[must_use]
    pub fn deferred_len(&self) -> usize {
        self.commands.len()
    }

    /// Applies the world's queued commands. Returns how many succeeded.
    pub fn apply_deferred(&mut self) -> usize {
        let commands = self.commands.drain();
        self.apply_all(commands)
    }

    /// Applies the commands recorded in `buffer`, draining it. Returns how
    /// many succeeded; failures are logged and skipped.
    pub fn apply_commands(&mut self, buffer: &mut CommandBuffer) -> usize {
        let commands = buffer.drain();
        self.apply_all(commands)
    }

    fn apply_all(&mut self, commands: Vec<Command>) -> usize {
        let mut applied = 0;
        for command in commands {
            let entity = command.entity();
            let result = match command {
                Command::Delete(e) => self.delete_entity(e),
                Command::AddFragment(e, data) => self.add_fragment(e, data),
                Command::RemoveFragment(e, f) => self.remove_fragment(e, f),
                Command::SetInstanceCount(e, count) => self.set_entity_instance_count(e, count),
            };
            match result {
                Ok(()) => applied += 1,
                Err(err) => tracing::warn!("Deferred command on {:?} failed: {}", entity, err),
            }
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::ecs::column::ScalarKind;
    use crate::ecs::fragment::{FieldDef, FragmentSchema};
    use crate::error::StoreError;

    #[test]
    fn test_buffer_is_bounded_and_drains_in_order() {
        let mut buffer = CommandBuffer::new(2);
        let a = EntityId::new(0, 1);
        let b = EntityId::new(1, 1);
        buffer.delete(a).unwrap();
        buffer.set_instance_count(b, 3).unwrap();
        let err = buffer.delete(b).unwrap_err();
        assert!(err.is_capacity_error());

        let drained = buffer.drain();
        assert_eq!(drained, vec![Command::Delete(a), Command::SetInstanceCount(b, 3)]);
        assert!(buffer.is_empty());
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn test_deferred_commands_apply_at_frame_end() {
        let mut world = World::new(StoreConfig::with_chunk_capacity(4)).unwrap();
        let tag = world
            .register_fragment(
                FragmentSchema::builder("tag")
                    .field(FieldDef::new("id", ScalarKind::U32, 1))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let a = world.create_entity().unwrap();
        let b = world.create_entity().unwrap();

        world
            .defer(Command::AddFragment(a, FragmentData::new(tag).with("id", 7u32)))
            .unwrap();
        world.defer(Command::Delete(b)).unwrap();
        // Fails at apply time: b is gone by then.
        world.defer(Command::SetInstanceCount(b, 2)).unwrap();
        assert!(world.is_alive(b));
        assert_eq!(world.deferred_len(), 3);

        world.end_frame();
        assert_eq!(world.deferred_len(), 0);
        assert!(!world.is_alive(b));
        assert!(world.has_fragment(a, tag).unwrap());
        assert_eq!(world.get_field(a, 0, tag, "id").unwrap().as_u32().unwrap(), &[7]);
        world.validate().unwrap();
    }

    #[test]
    fn test_external_buffer_reports_successes() {
        let mut world = World::default();
        let a = world.create_entity().unwrap();
        let mut buffer = CommandBuffer::new(4);
        buffer.set_instance_count(a, 0).unwrap();
        buffer.set_instance_count(a, 3).unwrap();
        assert_eq!(world.apply_commands(&mut buffer), 1);
        assert_eq!(world.get_entity_instance_count(a).unwrap(), 3);
        assert_eq!(
            world.set_entity_instance_count(a, 0),
            Err(StoreError::InvalidInstanceCount(0))
        );
    }
}
