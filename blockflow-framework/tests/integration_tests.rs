//! Integration tests for single-system declarations, replay and evaluation

use blockflow_framework::prelude::*;
use blockflow_framework::{FrameworkConfig, PortKind, WarnedPortSet};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Plant;
struct Filter;
struct LegacyPlant;
struct OtherLegacyPlant;

/// Plant with two vector inputs, a discrete state group, a chain of two
/// cache entries and an output computed by the second entry.
struct PlantFixture {
    system: SystemBase,
    u0: InputPortIndex,
    u1: InputPortIndex,
    xd: DependencyTicket,
    sum: CacheIndex,
    scaled: CacheIndex,
    y: OutputPortIndex,
    sum_calls: Arc<AtomicUsize>,
}

fn plant() -> PlantFixture {
    let mut system = SystemBase::new::<Plant>("plant");
    let u0 = system.declare_input_port("u0", PortDataType::vector(2));
    let u1 = system.declare_input_port("u1", PortDataType::vector(2));
    let xd = system.declare_discrete_state_group("xd0");
    let u0_ticket = system.get_input_port_base(u0).unwrap().ticket();
    let u1_ticket = system.get_input_port_base(u1).unwrap().ticket();

    let sum_calls = Arc::new(AtomicUsize::new(0));
    let calls = sum_calls.clone();
    let sum_entry = system
        .declare_typed_cache_entry(
            "sum",
            BasicVector::zeros(2),
            move |sys: &SystemBase, ctx: ContextRef<'_>, out: &mut BasicVector| {
                calls.fetch_add(1, Ordering::SeqCst);
                let a = sys.eval_vector_input(ctx, u0)?.unwrap_or_else(|| BasicVector::zeros(2));
                let b = sys.eval_vector_input(ctx, u1)?.unwrap_or_else(|| BasicVector::zeros(2));
                for (i, v) in out.values_mut().iter_mut().enumerate() {
                    *v = a.values()[i] + b.values()[i];
                }
                Ok(())
            },
            [u0_ticket, u1_ticket],
        )
        .unwrap();
    let sum = sum_entry.cache_index();
    let sum_ticket = sum_entry.ticket();

    let scaled_entry = system
        .declare_typed_cache_entry(
            "scaled",
            BasicVector::zeros(2),
            move |sys: &SystemBase, ctx: ContextRef<'_>, out: &mut BasicVector| {
                let sum = sys.eval_cache_entry(ctx, sum)?;
                let sum = sum.get::<BasicVector>().cloned().unwrap_or_default();
                *out = BasicVector::new(sum.values().iter().map(|v| v * 10.0).collect());
                Ok(())
            },
            [sum_ticket, xd],
        )
        .unwrap();
    let scaled = scaled_entry.cache_index();
    let scaled_ticket = scaled_entry.ticket();

    let y = system.declare_output_port(
        "y",
        PortDataType::vector(2),
        OutputPortPrerequisite::internal(scaled_ticket),
    );

    PlantFixture {
        system,
        u0,
        u1,
        xd,
        sum,
        scaled,
        y,
        sum_calls,
    }
}

fn vector(values: &[f64]) -> AbstractValue {
    AbstractValue::new(BasicVector::new(values.to_vec()))
}

#[test]
fn test_replay_produces_acyclic_graph() {
    let fixture = plant();
    let mut tree = ContextTree::new();
    let ctx = fixture.system.create_context(&mut tree, None).unwrap();

    let graph = tree.get_base(ctx).unwrap().dependency_graph();
    let order = graph.topological_order().expect("graph must be acyclic");
    assert_eq!(order.len(), graph.num_trackers());

    // Every tracker appears after all of its prerequisites.
    let position = |t: DependencyTicket| order.iter().position(|o| *o == t).unwrap();
    for tracker in graph.trackers() {
        for prerequisite in tracker.prerequisites() {
            assert!(position(*prerequisite) < position(tracker.ticket()));
        }
    }
}

#[test]
fn test_declaration_counts_survive_replay() {
    let fixture = plant();
    let mut tree = ContextTree::new();
    let ctx = fixture.system.create_context(&mut tree, None).unwrap();
    let base = tree.get_base(ctx).unwrap();

    assert!(base.is_initialized());
    assert_eq!(base.num_input_ports(), 2);
    assert_eq!(base.num_output_ports(), 1);
    assert_eq!(base.cache().len(), 2);
    assert_eq!(base.system_name(), "plant");
    assert_eq!(base.get_system_id(), Some(fixture.system.get_system_id()));
    assert_eq!(
        base.source_tickets(blockflow_framework::SourceGroup::DiscreteState),
        &[fixture.xd]
    );
}

#[test]
fn test_reinitialization_rejected() {
    let fixture = plant();
    let mut tree = ContextTree::new();
    let ctx = fixture.system.create_context(&mut tree, None).unwrap();

    let err = fixture
        .system
        .initialize_context(tree.get_mut(ctx).unwrap())
        .unwrap_err();
    assert!(matches!(err, FrameworkError::ContextAlreadyInitialized { .. }));
}

#[test]
fn test_allocated_value_visible_before_evaluation() {
    let fixture = plant();
    let mut tree = ContextTree::new();
    let ctx = fixture.system.create_context(&mut tree, None).unwrap();

    let value = tree
        .get_base(ctx)
        .unwrap()
        .cache()
        .get(fixture.sum)
        .unwrap()
        .peek()
        .unwrap();
    assert_eq!(value.get::<BasicVector>(), Some(&BasicVector::zeros(2)));
    assert_eq!(fixture.sum_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_unconnected_root_input_is_none() {
    let fixture = plant();
    let mut tree = ContextTree::new();
    let ctx = fixture.system.create_context(&mut tree, None).unwrap();

    let value = fixture
        .system
        .eval_abstract_input(tree.get(ctx).unwrap(), fixture.u0)
        .unwrap();
    assert!(value.is_none());

    let err = fixture
        .system
        .eval_required_input(tree.get(ctx).unwrap(), fixture.u0)
        .unwrap_err();
    assert!(matches!(err, FrameworkError::CantEvaluateInputPort { .. }));
}

#[test]
fn test_fixed_input_returns_same_value() {
    let fixture = plant();
    let mut tree = ContextTree::new();
    let ctx = fixture.system.create_context(&mut tree, None).unwrap();

    let fixed = tree.fix_input_port(ctx, fixture.u1, vector(&[1.0, 2.0])).unwrap();
    let value = fixture
        .system
        .eval_abstract_input(tree.get(ctx).unwrap(), fixture.u1)
        .unwrap()
        .unwrap();
    assert!(Arc::ptr_eq(&fixed, &value));

    let typed = fixture
        .system
        .eval_vector_input(tree.get(ctx).unwrap(), fixture.u1)
        .unwrap()
        .unwrap();
    assert_eq!(typed.values(), &[1.0, 2.0]);
}

#[test]
fn test_input_index_out_of_range() {
    let fixture = plant();
    let mut tree = ContextTree::new();
    let ctx = fixture.system.create_context(&mut tree, None).unwrap();

    let err = fixture
        .system
        .eval_abstract_input(tree.get(ctx).unwrap(), InputPortIndex(5))
        .unwrap_err();
    insta::assert_snapshot!(
        err.to_string(),
        @"System::EvalAbstractInput(): there is no input port with index 5 because there are only 2 input ports in system ::plant."
    );

    let err = fixture
        .system
        .input_port_index_from_raw("EvalAbstractInput", -3)
        .unwrap_err();
    assert!(matches!(err, FrameworkError::NegativePortIndex { index: -3, .. }));
}

#[test]
fn test_fixing_wrong_type_rejected() {
    let fixture = plant();
    let mut tree = ContextTree::new();
    let ctx = fixture.system.create_context(&mut tree, None).unwrap();

    let err = tree
        .fix_input_port(ctx, fixture.u0, AbstractValue::new(String::from("nope")))
        .unwrap_err();
    assert!(matches!(err, FrameworkError::InputPortWrongType { index: 0, .. }));
    assert!(tree
        .get_base(ctx)
        .unwrap()
        .maybe_get_fixed_input_port_value(fixture.u0)
        .is_none());
}

#[test]
fn test_abstract_port_is_not_a_vector_port() {
    let mut system = SystemBase::new::<Filter>("filter");
    let u = system.declare_input_port("u", PortDataType::abstract_of::<BasicVector>());
    let mut tree = ContextTree::new();
    let ctx = system.create_context(&mut tree, None).unwrap();
    tree.fix_input_port(ctx, u, vector(&[1.0])).unwrap();

    let err = system.eval_vector_input(tree.get(ctx).unwrap(), u).unwrap_err();
    assert!(matches!(err, FrameworkError::NotAVectorInputPort { .. }));

    let err = system
        .eval_input_value::<f64>(tree.get(ctx).unwrap(), u)
        .unwrap_err();
    assert!(matches!(err, FrameworkError::InputPortWrongType { .. }));

    let value = system
        .eval_input_value::<BasicVector>(tree.get(ctx).unwrap(), u)
        .unwrap();
    assert_eq!(value, Some(BasicVector::new(vec![1.0])));
}

#[test]
fn test_lazy_recompute_after_input_change() {
    let fixture = plant();
    let mut tree = ContextTree::new();
    let ctx = fixture.system.create_context(&mut tree, None).unwrap();
    tree.fix_input_port(ctx, fixture.u0, vector(&[1.0, 1.0])).unwrap();
    tree.fix_input_port(ctx, fixture.u1, vector(&[2.0, 3.0])).unwrap();

    let y = fixture.system.eval_output(tree.get(ctx).unwrap(), fixture.y).unwrap();
    assert_eq!(y.get::<BasicVector>().unwrap().values(), &[30.0, 40.0]);
    assert_eq!(fixture.sum_calls.load(Ordering::SeqCst), 1);

    // Nothing changed: both entries are served from the cache.
    fixture.system.eval_output(tree.get(ctx).unwrap(), fixture.y).unwrap();
    assert_eq!(fixture.sum_calls.load(Ordering::SeqCst), 1);

    tree.fix_input_port(ctx, fixture.u1, vector(&[0.0, 0.0])).unwrap();
    let y = fixture.system.eval_output(tree.get(ctx).unwrap(), fixture.y).unwrap();
    assert_eq!(y.get::<BasicVector>().unwrap().values(), &[10.0, 10.0]);
    assert_eq!(fixture.sum_calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_state_change_skips_unaffected_entry() {
    let fixture = plant();
    let mut tree = ContextTree::new();
    let ctx = fixture.system.create_context(&mut tree, None).unwrap();
    tree.fix_input_port(ctx, fixture.u0, vector(&[1.0, 1.0])).unwrap();

    fixture
        .system
        .eval_cache_entry(tree.get(ctx).unwrap(), fixture.scaled)
        .unwrap();

    // Discrete state feeds "scaled" but not "sum".
    tree.note_value_change(ctx, fixture.xd).unwrap();
    let cache = tree.get_base(ctx).unwrap().cache();
    let graph = tree.get_base(ctx).unwrap().dependency_graph();
    let sum_value = cache.get(fixture.sum).unwrap();
    let scaled_value = cache.get(fixture.scaled).unwrap();
    assert!(!sum_value.is_out_of_date(graph.get_tracker(sum_value.ticket()).unwrap().change_serial()));
    assert!(scaled_value.is_out_of_date(graph.get_tracker(scaled_value.ticket()).unwrap().change_serial()));

    fixture
        .system
        .eval_cache_entry(tree.get(ctx).unwrap(), fixture.scaled)
        .unwrap();
    assert_eq!(fixture.sum_calls.load(Ordering::SeqCst), 1);

    let metrics = tree.get_base(ctx).unwrap().cache().metrics();
    assert_eq!(metrics[0].computations, 1);
    assert_eq!(metrics[0].hits, 1);
    assert_eq!(metrics[1].computations, 2);
}

#[test]
fn test_caching_disabled_by_config() {
    let fixture = plant();
    let config = FrameworkConfig::from_yaml_str("caching_enabled: false").unwrap();
    let mut tree = ContextTree::with_config(config);
    let ctx = fixture.system.create_context(&mut tree, None).unwrap();

    for _ in 0..3 {
        fixture
            .system
            .eval_cache_entry(tree.get(ctx).unwrap(), fixture.sum)
            .unwrap();
    }
    assert_eq!(fixture.sum_calls.load(Ordering::SeqCst), 3);

    tree.enable_caching(ctx).unwrap();
    for _ in 0..3 {
        fixture
            .system
            .eval_cache_entry(tree.get(ctx).unwrap(), fixture.sum)
            .unwrap();
    }
    assert_eq!(fixture.sum_calls.load(Ordering::SeqCst), 4);
}

#[test]
fn test_entry_disabled_by_default() {
    let mut system = SystemBase::new::<Filter>("filter");
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let index = system
        .declare_typed_cache_entry(
            "always fresh",
            0_usize,
            move |_: &SystemBase, _: ContextRef<'_>, out: &mut usize| {
                *out = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(())
            },
            [DependencyTicket::TIME],
        )
        .unwrap()
        .disable_caching_by_default()
        .cache_index();

    let mut tree = ContextTree::new();
    let ctx = system.create_context(&mut tree, None).unwrap();
    let first = system.eval_cache_entry(tree.get(ctx).unwrap(), index).unwrap();
    let second = system.eval_cache_entry(tree.get(ctx).unwrap(), index).unwrap();
    assert_eq!(first.get::<usize>(), Some(&1));
    assert_eq!(second.get::<usize>(), Some(&2));
}

#[test]
fn test_failed_computation_leaves_entry_stale() {
    let mut system = SystemBase::new::<Filter>("filter");
    let u = system.declare_input_port("u", PortDataType::abstract_of::<f64>());
    let u_ticket = system.get_input_port_base(u).unwrap().ticket();
    let index = system
        .declare_typed_cache_entry(
            "reciprocal",
            0.0_f64,
            move |sys: &SystemBase, ctx: ContextRef<'_>, out: &mut f64| {
                let value = sys.eval_required_input(ctx, u)?;
                *out = 1.0 / value.get::<f64>().copied().unwrap_or_default();
                Ok(())
            },
            [u_ticket],
        )
        .unwrap()
        .cache_index();

    let mut tree = ContextTree::new();
    let ctx = system.create_context(&mut tree, None).unwrap();
    assert!(system.eval_cache_entry(tree.get(ctx).unwrap(), index).is_err());

    tree.fix_input_port(ctx, u, AbstractValue::new(4.0_f64)).unwrap();
    let value = system.eval_cache_entry(tree.get(ctx).unwrap(), index).unwrap();
    assert_eq!(value.get::<f64>(), Some(&0.25));
}

#[test]
fn test_panicking_computation_does_not_poison_entry() {
    let mut system = SystemBase::new::<Filter>("filter");
    let u = system.declare_input_port("u", PortDataType::abstract_of::<f64>());
    let u_ticket = system.get_input_port_base(u).unwrap().ticket();
    let index = system
        .declare_typed_cache_entry(
            "checked reciprocal",
            0.0_f64,
            move |sys: &SystemBase, ctx: ContextRef<'_>, out: &mut f64| {
                let value = *sys.eval_required_input(ctx, u)?.get::<f64>().unwrap();
                assert!(value != 0.0, "division by zero");
                *out = 1.0 / value;
                Ok(())
            },
            [u_ticket],
        )
        .unwrap()
        .cache_index();

    let mut tree = ContextTree::new();
    let ctx = system.create_context(&mut tree, None).unwrap();
    tree.fix_input_port(ctx, u, AbstractValue::new(0.0_f64)).unwrap();

    let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        system.eval_cache_entry(tree.get(ctx).unwrap(), index)
    }));
    assert!(panicked.is_err());

    // The slot is back in place: a later evaluation recomputes instead of
    // reporting a reentered entry.
    tree.fix_input_port(ctx, u, AbstractValue::new(2.0_f64)).unwrap();
    let value = system.eval_cache_entry(tree.get(ctx).unwrap(), index).unwrap();
    assert_eq!(value.get::<f64>(), Some(&0.5));
}

#[test]
fn test_output_without_cache_entry() {
    let mut system = SystemBase::new::<Filter>("filter");
    let y = system.declare_output_port(
        "time",
        PortDataType::abstract_of::<f64>(),
        OutputPortPrerequisite::internal(DependencyTicket::TIME),
    );
    let mut tree = ContextTree::new();
    let ctx = system.create_context(&mut tree, None).unwrap();

    let err = system.eval_output(tree.get(ctx).unwrap(), y).unwrap_err();
    assert!(matches!(err, FrameworkError::OutputNotCacheBacked { .. }));
}

#[test]
fn test_contexts_evaluated_on_separate_threads() {
    let fixture = Arc::new(plant());

    std::thread::scope(|scope| {
        for i in 0..4 {
            let fixture = fixture.clone();
            scope.spawn(move || {
                let mut tree = ContextTree::new();
                let ctx = fixture.system.create_context(&mut tree, None).unwrap();
                let x = i as f64;
                tree.fix_input_port(ctx, fixture.u0, vector(&[x, x])).unwrap();
                tree.fix_input_port(ctx, fixture.u1, vector(&[1.0, 1.0])).unwrap();

                let y = fixture.system.eval_output(tree.get(ctx).unwrap(), fixture.y).unwrap();
                assert_eq!(y.get::<BasicVector>().unwrap().values(), &[(x + 1.0) * 10.0; 2]);
            });
        }
    });

    assert_eq!(fixture.sum_calls.load(Ordering::SeqCst), 4);
}

#[derive(Clone, Default)]
struct SharedBuffer(Arc<parking_lot::Mutex<Vec<u8>>>);

impl io::Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SharedBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

fn deprecated_system<T: 'static>(registry: &Arc<WarnedPortSet>, message: &str) -> (SystemBase, InputPortIndex) {
    let mut system = SystemBase::new::<T>("legacy").with_deprecation_registry(registry.clone());
    let u = system.declare_input_port("old_u", PortDataType::vector(1));
    system.deprecate_input_port(u, message).unwrap();
    (system, u)
}

#[test]
fn test_deprecated_port_warns_once_per_type() {
    let buffer = SharedBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();

    let registry = Arc::new(WarnedPortSet::new());
    tracing::subscriber::with_default(subscriber, || {
        let (first, u) = deprecated_system::<LegacyPlant>(&registry, "use u instead");
        let (second, _) = deprecated_system::<LegacyPlant>(&registry, "use u instead");
        let (other, _) = deprecated_system::<OtherLegacyPlant>(&registry, "");

        for system in [&first, &second, &first, &other, &other] {
            let mut tree = ContextTree::new();
            let ctx = system.create_context(&mut tree, None).unwrap();
            system.eval_abstract_input(tree.get(ctx).unwrap(), u).unwrap();
        }
    });

    let logs = buffer.contents();
    assert_eq!(logs.matches("is deprecated").count(), 2);
    assert!(logs.contains("InputPort[0] (old_u) of System ::legacy"));
    assert!(logs.contains("use u instead"));
    assert!(logs.contains("no deprecation details were provided"));
    assert_eq!(registry.len(), 2);
}

#[test]
fn test_disabled_deprecation_warnings_only_silence_evaluation() {
    let registry = Arc::new(WarnedPortSet::new());
    let (system, u) = deprecated_system::<Filter>(&registry, "gone");
    let config = FrameworkConfig {
        deprecation_warnings: false,
        ..FrameworkConfig::default()
    };
    let mut tree = ContextTree::with_config(config);
    let ctx = system.create_context(&mut tree, None).unwrap();

    system.eval_abstract_input(tree.get(ctx).unwrap(), u).unwrap();
    assert!(registry.is_empty());

    // Explicit reporting is unaffected by the config.
    assert!(system.warn_port_deprecation(PortKind::Input, u.as_usize()));
}
