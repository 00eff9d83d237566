//! # Storage Scenarios
//!
//! End-to-end checks of the public API:
//!
//! 1. **Chunk placement**: fill order, slot reuse after delete
//! 2. **Instancing**: multi-segment entities and chunk iteration
//! 3. **Migration**: fragment round trips, prefix preservation, atomicity
//! 4. **External sync**: shared staging buffers, no-op second sync
//! 5. **Frame cycle**: deferred commands, accessors, hierarchy
//!
//! Run with: cargo test --test storage_scenarios

use strata_core::ecs::QueryDescriptor;
use strata_core::sync::SyncAction;
use strata_core::{
    Column, EntityFlags, EntityId, FieldDef, FragmentData, FragmentId, FragmentSchema, Hierarchy,
    ScalarKind, SharedBufferSink, StoreConfig, StoreError, World,
};

fn world(chunk_capacity: usize) -> (World, FragmentId, FragmentId) {
    let mut world = World::new(StoreConfig::with_chunk_capacity(chunk_capacity)).unwrap();
    let position = world
        .register_fragment(
            FragmentSchema::builder("position")
                .field(FieldDef::new("xyz", ScalarKind::F32, 3).mirrored())
                .build()
                .unwrap(),
        )
        .unwrap();
    let light = world
        .register_fragment(
            FragmentSchema::builder("light")
                .field(FieldDef::new("intensity", ScalarKind::F32, 1).with_default(1.0f32))
                .build()
                .unwrap(),
        )
        .unwrap();
    (world, position, light)
}

fn spawn_pl(world: &mut World, position: FragmentId, light: FragmentId, x: f32) -> EntityId {
    world
        .spawn(&[
            FragmentData::new(position).with("xyz", [x, 0.0, 0.0]),
            FragmentData::new(light),
        ])
        .unwrap()
}

// ============================================================================
// CHUNK PLACEMENT
// ============================================================================

#[test]
fn spawn_fills_chunks_in_order_and_reuses_freed_slots() {
    let (mut world, position, light) = world(2);
    let entities: Vec<_> = (0..3)
        .map(|i| spawn_pl(&mut world, position, light, i as f32))
        .collect();

    let archetype = world.location(entities[0]).unwrap().archetype;
    let occupied: Vec<usize> = world
        .archetype(archetype)
        .unwrap()
        .chunks()
        .iter()
        .map(|c| c.live_slots())
        .collect();
    assert_eq!(occupied, vec![2, 1]);

    let (chunk, slot) = world.location(entities[2]).unwrap().head();
    assert_eq!(chunk.index, 1);
    world.delete_entity(entities[2]).unwrap();

    let replacement = spawn_pl(&mut world, position, light, 9.0);
    assert_eq!(world.location(replacement).unwrap().head(), (chunk, slot));
    assert_eq!(world.archetype(archetype).unwrap().chunks().len(), 2);
    world.validate().unwrap();
}

// ============================================================================
// INSTANCING
// ============================================================================

#[test]
fn five_instances_span_two_chunks() {
    let (mut world, position, _) = world(4);
    let e = world
        .spawn(&[FragmentData::new(position).with("xyz", [1.0f32, 2.0, 3.0])])
        .unwrap();
    world.set_entity_instance_count(e, 5).unwrap();

    let runs: Vec<u32> = world
        .location(e)
        .unwrap()
        .segments
        .iter()
        .map(|s| s.run_length)
        .collect();
    assert_eq!(runs, vec![4, 1]);
    assert_eq!(world.get_entity_instance_count(e).unwrap(), 5);
    assert_eq!(
        world.get_field(e, 0, position, "xyz").unwrap(),
        Column::from([1.0f32, 2.0, 3.0])
    );

    let query = world.create_query_for(&[position]).unwrap();
    let mut visited = 0;
    world
        .for_each_chunk(query, |_, _, run_lengths, _| {
            visited += run_lengths.iter().sum::<u32>();
        })
        .unwrap();
    assert_eq!(visited, 5);

    let mut heads = 0;
    world
        .for_each(query, |_, _, instances, _| {
            heads += 1;
            assert_eq!(instances, 5);
        })
        .unwrap();
    assert_eq!(heads, 1);
    world.validate().unwrap();
}

#[test]
fn instance_slot_writes_do_not_create_entities() {
    let (mut world, position, _) = world(2);
    let e = world
        .spawn(&[FragmentData::new(position).with("xyz", [1.0f32, 0.0, 0.0])])
        .unwrap();
    world.set_entity_instance_count(e, 3).unwrap();
    assert_eq!(world.location(e).unwrap().segments.len(), 2);

    let (chunk, slot) = world.location(e).unwrap().head();
    let moved = FragmentData::new(position).with("xyz", [7.0f32, 0.0, 0.0]);
    world.chunk_mut(chunk).unwrap().update_entity_data(slot + 1, &moved).unwrap();
    let tail = world.location(e).unwrap().segments[1];
    world
        .chunk_mut(tail.chunk)
        .unwrap()
        .update_entity_data(tail.slot as usize, &moved)
        .unwrap();

    let query = world.create_query_for(&[position]).unwrap();
    let mut visits = 0;
    world
        .for_each(query, |_, _, instances, _| {
            visits += 1;
            assert_eq!(instances, 3);
        })
        .unwrap();
    assert_eq!(visits, 1);
    assert_eq!(world.matched_entity_count(query).unwrap(), 1);
    assert_eq!(
        world.get_field(e, 1, position, "xyz").unwrap(),
        Column::from([7.0f32, 0.0, 0.0])
    );
    world.validate().unwrap();
}

// ============================================================================
// MIGRATION
// ============================================================================

#[test]
fn add_then_remove_restores_fragment_set() {
    let (mut world, position, light) = world(4);
    let e = world
        .spawn(&[FragmentData::new(position).with("xyz", [5.0f32, 6.0, 7.0])])
        .unwrap();
    let before = world.fragments_of(e).unwrap().clone();

    world
        .add_fragment(e, FragmentData::new(light).with("intensity", 3.0f32))
        .unwrap();
    assert!(world.has_fragment(e, light).unwrap());
    world.remove_fragment(e, light).unwrap();

    assert_eq!(world.fragments_of(e).unwrap(), &before);
    assert_eq!(
        world.get_field(e, 0, position, "xyz").unwrap(),
        Column::from([5.0f32, 6.0, 7.0])
    );
    world.validate().unwrap();
}

#[test]
fn instance_count_round_trip_keeps_prefix() {
    let (mut world, position, _) = world(4);
    let e = world.spawn(&[FragmentData::new(position)]).unwrap();
    world.set_entity_instance_count(e, 3).unwrap();
    for i in 0..3 {
        let data = FragmentData::new(position).with("xyz", [i as f32, 0.0, 0.0]);
        world.update_instance_data(e, i, &data).unwrap();
    }

    world.set_entity_instance_count(e, 9).unwrap();
    world.set_entity_instance_count(e, 2).unwrap();
    world.set_entity_instance_count(e, 3).unwrap();

    let xs: Vec<f32> = (0..3)
        .map(|i| world.get_field(e, i, position, "xyz").unwrap().as_f32().unwrap()[0])
        .collect();
    assert_eq!(xs, vec![0.0, 1.0, 0.0]);
    world.validate().unwrap();
}

#[test]
fn failed_migration_leaves_entity_untouched() {
    let mut config = StoreConfig::with_chunk_capacity(2);
    config.max_chunks_per_archetype = 1;
    let mut world = World::new(config).unwrap();
    let position = world
        .register_fragment(
            FragmentSchema::builder("position")
                .field(FieldDef::new("xyz", ScalarKind::F32, 3))
                .build()
                .unwrap(),
        )
        .unwrap();
    let e = world
        .spawn(&[FragmentData::new(position).with("xyz", [1.0f32, 1.0, 1.0])])
        .unwrap();
    let before = world.location(e).unwrap().clone();

    let err = world.set_entity_instance_count(e, 3).unwrap_err();
    assert!(matches!(err, StoreError::ChunkLimit { limit: 1, .. }));
    assert!(err.is_capacity_error());

    assert_eq!(world.location(e).unwrap(), &before);
    assert_eq!(
        world.get_field(e, 0, position, "xyz").unwrap(),
        Column::from([1.0f32, 1.0, 1.0])
    );
    world.validate().unwrap();
}

// ============================================================================
// EXTERNAL SYNC
// ============================================================================

#[test]
fn shared_sink_publishes_and_second_sync_is_noop() {
    let (mut world, position, light) = world(2);
    for x in [1.0, 2.0, 3.0] {
        spawn_pl(&mut world, position, light, x);
    }
    let mut sink = SharedBufferSink::new();
    let reader = sink.reader();

    let data = world.to_external_data(position, &mut sink).unwrap().unwrap();
    assert_eq!(data.byte_length, 3 * 12);
    let xs: Vec<f32> = reader
        .with_bytes(data.handle, |bytes| {
            bytes[..data.byte_length]
                .chunks_exact(12)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect()
        })
        .unwrap();
    assert_eq!(xs, vec![1.0, 2.0, 3.0]);
    let version = reader.version(data.handle).unwrap();

    let again = world.to_external_data(position, &mut sink).unwrap().unwrap();
    assert_eq!(again, data);
    let stats = world.last_sync_stats().unwrap();
    assert_eq!(stats.action, SyncAction::Skipped);
    assert!(stats.is_noop());
    assert_eq!(reader.version(data.handle), Some(version));

    // Light has no mirrored field.
    assert!(world.to_external_data(light, &mut sink).unwrap().is_none());
}

#[test]
fn removed_record_shrinks_external_buffer() {
    let (mut world, position, light) = world(4);
    let first = spawn_pl(&mut world, position, light, 1.0);
    spawn_pl(&mut world, position, light, 2.0);
    let mut sink = SharedBufferSink::new();
    let reader = sink.reader();
    let data = world.to_external_data(position, &mut sink).unwrap().unwrap();
    assert_eq!(data.byte_length, 2 * 12);

    let (chunk, slot) = world.location(first).unwrap().head();
    world.chunk_mut(chunk).unwrap().remove_entity(slot).unwrap();
    assert_eq!(world.chunk(chunk).unwrap().live_slots(), 2);

    let data = world.to_external_data(position, &mut sink).unwrap().unwrap();
    assert_eq!(data.byte_length, 12);
    let x = reader
        .with_bytes(data.handle, |bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .unwrap();
    assert_eq!(x, 2.0);
}

// ============================================================================
// FRAME CYCLE
// ============================================================================

#[test]
fn commands_recorded_during_iteration_apply_at_frame_end() {
    let (mut world, position, light) = world(4);
    for x in [1.0, 2.0, 3.0] {
        spawn_pl(&mut world, position, light, x);
    }
    let plain = world.spawn(&[FragmentData::new(position)]).unwrap();
    let unlit = world
        .create_query(&QueryDescriptor::new(vec![position]).excluding(vec![light]))
        .unwrap();
    assert_eq!(world.matched_entity_count(unlit).unwrap(), 1);

    let all = world.create_query_for(&[position]).unwrap();
    world
        .for_each_with_commands(all, |chunk, slot, _, signature, commands| {
            let Some(owner) = chunk.owner(slot) else {
                return;
            };
            if signature.contains(light) {
                commands.remove_fragment(owner, light).unwrap();
            } else {
                commands.delete(owner).unwrap();
            }
        })
        .unwrap();
    assert_eq!(world.deferred_len(), 4);

    world.end_frame();
    assert!(!world.is_alive(plain));
    assert_eq!(world.entity_count(), 3);
    assert_eq!(world.matched_entity_count(unlit).unwrap(), 3);
    world.validate().unwrap();
}

#[test]
fn marked_entities_die_at_frame_end() {
    let (mut world, position, light) = world(4);
    let a = spawn_pl(&mut world, position, light, 1.0);
    let b = spawn_pl(&mut world, position, light, 2.0);
    world.mark_for_deletion(a).unwrap();
    assert!(world
        .get_entity_flags(a)
        .unwrap()
        .contains(EntityFlags::PENDING_DELETE));

    world.end_frame();
    assert!(!world.is_alive(a));
    assert!(world.is_alive(b));
    assert_eq!(world.frame(), 1);
}

#[test]
fn accessor_survives_writes_but_not_structure() {
    let (mut world, position, light) = world(4);
    let e = spawn_pl(&mut world, position, light, 1.0);
    let handle = world.accessor(e, 0, position, "xyz").unwrap();

    world.write_field(handle, [4.0f32, 5.0, 6.0]).unwrap();
    world
        .update_entity_data(e, &FragmentData::new(light).with("intensity", 2.0f32))
        .unwrap();
    assert_eq!(world.read_field(handle).unwrap(), Column::from([4.0f32, 5.0, 6.0]));

    world.remove_fragment(e, light).unwrap();
    assert_eq!(world.read_field(handle), Err(StoreError::StaleAccessor));
    let fresh = world.accessor(e, 0, position, "xyz").unwrap();
    assert_eq!(world.read_field(fresh).unwrap(), Column::from([4.0f32, 5.0, 6.0]));
}

#[test]
fn hierarchy_flattens_instances_depth_first() {
    let (mut world, position, _) = world(4);
    let root = world.spawn(&[FragmentData::new(position)]).unwrap();
    let forest = world.spawn(&[FragmentData::new(position)]).unwrap();
    let rock = world.spawn(&[FragmentData::new(position)]).unwrap();
    world.set_entity_instance_count(forest, 6).unwrap();

    let mut scene = Hierarchy::new();
    let root_node = scene.insert(root, None).unwrap();
    let forest_node = scene.insert(forest, Some(root_node)).unwrap();
    scene.insert(rock, Some(root_node)).unwrap();

    let flat = scene.flatten(&world);
    assert_eq!(flat.len(), 1 + 6 + 1);
    assert_eq!(flat[0], (root, 0));
    assert_eq!(flat[6], (forest, 5));
    assert_eq!(flat[7], (rock, 0));

    scene.remove(forest_node).unwrap();
    assert_eq!(scene.flatten(&world).len(), 2);
}

#[test]
fn config_from_toml_drives_chunk_size() {
    let config = StoreConfig::from_toml_str("chunk_capacity = 8\nmax_queries = 4\n").unwrap();
    let mut world = World::new(config).unwrap();
    world.reserve_entities(20).unwrap();
    let root = world.archetype(strata_core::ArchetypeId::ROOT).unwrap();
    assert_eq!(root.chunk_capacity(), 8);
    assert_eq!(root.chunks().len(), 3);
}
