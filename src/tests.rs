#[cfg(test)]
mod tests {
    use std::any::TypeId;
    use std::sync::Once;

    use crate::World;

    static LOG_INIT: Once = Once::new();

    /// Surfaces the `trace`/`debug` structural logging (pool growth, GC,
    /// entity recycling) under `cargo test -- --nocapture`.
    fn init_logging() {
        LOG_INIT.call_once(|| {
            let _ = simple_logger::SimpleLogger::new().with_level(log::LevelFilter::Trace).init();
        });
    }

    struct Tag {
        name: &'static str,
    }
    struct Transform {
        x: i32,
        y: i32,
    }
    struct Position {
        x: f32,
        y: f32,
    }
    struct Velocity {
        dx: f32,
        dy: f32,
    }

    #[test]
    fn scenario_view_over_two_tagged_entities() {
        let mut world = World::new();
        let mut a = world.new_entity();
        a.add(Tag { name: "Bob" });
        a.add(Transform { x: 5, y: 3 });
        let mut b = world.new_entity();
        b.add(Tag { name: "Alice" });
        b.add(Transform { x: 3, y: 55 });

        let mut seen = Vec::new();
        let mut view = world.new_view(&[TypeId::of::<Tag>(), TypeId::of::<Transform>()]);
        while view.valid() {
            let name = view.get::<Tag>().name;
            let t = view.get::<Transform>();
            seen.push((name, t.x, t.y));
            view.next();
        }
        drop(view);
        seen.sort();
        assert_eq!(seen, vec![("Alice", 3, 55), ("Bob", 5, 3)]);
    }

    #[test]
    fn scenario_on_create_hook_observes_installed_value() {
        let mut world = World::new();
        world.set_create_func::<Tag>(|e| {
            assert_eq!(e.get::<Tag>().name, "X");
        });
        let mut e = world.new_entity();
        e.add(Tag { name: "X" });
    }

    #[test]
    fn scenario_on_destroy_hook_fires_once_with_last_value() {
        use std::cell::Cell;

        let fired = Box::leak(Box::new(Cell::new(0)));
        let mut world = World::new();
        world.set_destroy_func::<Tag>(move |e| {
            assert_eq!(e.get::<Tag>().name, "doomed");
            fired.set(fired.get() + 1);
        });
        let mut e = world.new_entity();
        e.add(Tag { name: "doomed" });
        e.destroy();
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn scenario_destroy_then_recreate_reuses_slot_lifo() {
        let mut world = World::new();
        let mut handles = Vec::new();
        for _ in 0..10 {
            handles.push(world.new_entity().get_handle());
        }
        let fourth = handles[4];
        world.destroy(fourth);

        let recreated = world.new_entity();
        assert_eq!(recreated.get_id(), 4);
        assert_eq!(recreated.get_version(), 1);
        assert!(!world.is_live(fourth));
    }

    #[test]
    fn scenario_view_growth_mid_iteration_is_safe() {
        init_logging();
        let mut world = World::new();
        // 128 entities exactly fills the Position pool's doubled-from-8
        // capacity, so the entity added mid-loop below forces a real
        // reallocation while the view is open.
        for i in 0..128 {
            let mut e = world.new_entity();
            e.add(Position { x: i as f32, y: 0.0 });
            e.add(Velocity { dx: 1.0, dy: 0.0 });
        }

        let mut visited = 0;
        let mut first_x = None;
        let mut view = world.new_view(&[TypeId::of::<Position>(), TypeId::of::<Velocity>()]);
        while view.valid() {
            if first_x.is_none() {
                first_x = Some(view.get::<Position>().x);
            }
            visited += 1;
            if visited == 1 {
                let mut new_e = view.world_mut().new_entity();
                new_e.add(Position { x: 999.0, y: 999.0 });
                new_e.add(Velocity { dx: 0.0, dy: 0.0 });
            }
            view.next();
        }
        drop(view);
        assert_eq!(visited, 128);
        assert_eq!(first_x, Some(127.0));
    }

    #[test]
    fn scenario_collect_garbage_shrinks_pool_and_keeps_survivors() {
        init_logging();
        let mut world = World::new();
        let mut survivors = Vec::new();
        for i in 0..1000 {
            let mut e = world.new_entity();
            e.add(Transform { x: i, y: i });
            if i < 100 {
                survivors.push((e.get_handle(), i));
            }
        }
        for i in 100..1000 {
            let h = world.at(i as usize);
            world.destroy(h);
        }

        world.collect_garbage();

        for (h, i) in survivors {
            assert!(world.has::<Transform>(h));
            assert_eq!(world.get::<Transform>(h).x, i);
        }
    }

    #[test]
    fn round_trip_add_get() {
        let mut world = World::new();
        let mut e = world.new_entity();
        e.add(Transform { x: 7, y: 8 });
        assert_eq!(e.get::<Transform>().x, 7);
        assert_eq!(e.get::<Transform>().y, 8);
    }

    #[test]
    fn round_trip_add_remove_readd() {
        let mut world = World::new();
        let mut e = world.new_entity();
        e.add(Transform { x: 1, y: 1 });
        e.remove::<Transform>();
        assert!(!e.has::<Transform>());
        e.add(Transform { x: 2, y: 2 });
        assert_eq!(e.get::<Transform>().x, 2);
    }

    #[test]
    fn round_trip_create_destroy_preserves_count() {
        let mut world = World::new();
        let before = world.count();
        let e = world.new_entity();
        e.destroy();
        assert_eq!(world.count(), before);
    }

    #[test]
    fn boundary_view_over_empty_pool_yields_nothing() {
        let mut world = World::new();
        let mut e = world.new_entity();
        e.add(Tag { name: "lonely" });
        // Transform pool never created, so intersection is empty.
        let mut view = world.new_view(&[TypeId::of::<Tag>(), TypeId::of::<Transform>()]);
        assert!(!view.valid());
        let _ = e.get_handle();
    }
}
