//! Kernel Registry & Dispatch Tests
//!
//! Tests for:
//! - Program build: reflection of entry points, slots and the launch range,
//!   build failures
//! - Kernel creation, lookup and range
//! - Parameter binding: consecutive slots, kind/size/stride checks, buffer
//!   coverage of fixed-size types, atomicity
//! - Dispatch: unbound slots, stale buffers, invalid ranges

use compute_manager::{
    ComputeContext, ComputeError, HostBackend, HostLaunch, KernelSource, LAUNCH_RANGE, Result,
    SlotKind,
};

const SOURCE: &str = r"
@group(0) @binding(0) var<storage, read_write> a: array<f32>;
@group(0) @binding(1) var<storage, read_write> b: array<f32>;
@group(0) @binding(2) var<uniform> factor: f32;
@group(0) @binding(3) var<storage, read> src: array<f32>;
@group(0) @binding(4) var<storage, read_write> points: array<vec4<f32>>;

@compute @workgroup_size(64)
fn addBuffers(@builtin(global_invocation_id) id: vec3<u32>) {
    let i = id.x;
    if (i >= arrayLength(&a)) {
        return;
    }
    a[i] = a[i] + b[i];
}

@compute @workgroup_size(32)
fn scale(@builtin(global_invocation_id) id: vec3<u32>) {
    let i = id.x;
    if (i >= arrayLength(&a)) {
        return;
    }
    a[i] = a[i] * factor;
}

@compute @workgroup_size(8, 8)
fn copyFrom(@builtin(global_invocation_id) id: vec3<u32>) {
    let i = id.x;
    if (i >= arrayLength(&a)) {
        return;
    }
    a[i] = src[i];
}

@compute @workgroup_size(16)
fn clearPoints(@builtin(global_invocation_id) id: vec3<u32>) {
    let i = id.x;
    if (i >= arrayLength(&points)) {
        return;
    }
    points[i] = vec4<f32>(0.0);
}
";

fn add_buffers(launch: &HostLaunch<'_>) -> Result<()> {
    let mut a = launch.load::<f32>(0)?;
    let b = launch.load::<f32>(1)?;
    for (x, y) in a.iter_mut().zip(&b).take(launch.range()) {
        *x += *y;
    }
    launch.store(0, &a)
}

fn scale(launch: &HostLaunch<'_>) -> Result<()> {
    let mut a = launch.load::<f32>(0)?;
    let factor = launch.value::<f32>(2)?;
    for x in a.iter_mut().take(launch.range()) {
        *x *= factor;
    }
    launch.store(0, &a)
}

fn copy_from(launch: &HostLaunch<'_>) -> Result<()> {
    let mut a = launch.load::<f32>(0)?;
    let src = launch.load::<f32>(3)?;
    for (x, y) in a.iter_mut().zip(&src).take(launch.range()) {
        *x = *y;
    }
    launch.store(0, &a)
}

fn clear_points(launch: &HostLaunch<'_>) -> Result<()> {
    let points = vec![[0.0_f32; 4]; launch.range()];
    launch.store(4, &points)
}

fn host() -> HostBackend {
    HostBackend::new()
        .with_kernel("addBuffers", add_buffers)
        .with_kernel("scale", scale)
        .with_kernel("copyFrom", copy_from)
        .with_kernel("clearPoints", clear_points)
}

fn context() -> ComputeContext<HostBackend> {
    ComputeContext::new(host(), SOURCE).unwrap()
}

// ============================================================================
// Program Build Tests
// ============================================================================

#[test]
fn reflection_records_workgroup_size_and_slots() {
    let ctx = context();
    let layout = ctx.program().layout();
    assert_eq!(layout.len(), 4);

    let add = layout.signature("addBuffers").unwrap();
    assert_eq!(add.workgroup_size, [64, 1, 1]);
    assert_eq!(add.slots.keys().copied().collect::<Vec<_>>(), [0, 1]);
    assert_eq!(add.slot(0).unwrap().kind, SlotKind::Buffer { read_only: false });
    assert_eq!(add.slot(0).unwrap().element_stride, Some(4));
    assert_eq!(add.slot(0).unwrap().name.as_deref(), Some("a"));

    let scale = layout.signature("scale").unwrap();
    assert_eq!(scale.slots.keys().copied().collect::<Vec<_>>(), [0, 2]);
    assert_eq!(scale.slot(2).unwrap().kind, SlotKind::Value);
    assert_eq!(scale.slot(2).unwrap().size, 4);

    let copy = layout.signature("copyFrom").unwrap();
    assert_eq!(copy.workgroup_size, [8, 8, 1]);
    assert_eq!(copy.slot(3).unwrap().kind, SlotKind::Buffer { read_only: true });

    let points = layout.signature("clearPoints").unwrap();
    assert_eq!(points.slot(4).unwrap().element_stride, Some(16));
    assert!(points.slot(4).unwrap().runtime_sized);
    assert!(!points.reads_launch_range);
}

#[test]
fn launch_range_is_reflected_outside_the_slot_table() {
    let source = KernelSource::new()
        .header(LAUNCH_RANGE)
        .fragment(
            "@group(0) @binding(0) var<storage, read_write> data: array<f32>;
             @compute @workgroup_size(64)
             fn bump(@builtin(global_invocation_id) id: vec3<u32>) {
                 if (id.x >= launch_range) { return; }
                 data[id.x] = data[id.x] + 1.0;
             }",
        )
        .build();
    let backend = HostBackend::new().with_kernel("bump", |_: &HostLaunch<'_>| Ok(()));
    let ctx = ComputeContext::new(backend, &source).unwrap();

    let bump = ctx.program().layout().signature("bump").unwrap();
    assert!(bump.reads_launch_range);
    assert_eq!(bump.slots.keys().copied().collect::<Vec<_>>(), [0]);
}

#[test]
fn launch_group_only_holds_the_range() {
    let source = r"
        @group(1) @binding(0) var<uniform> launch_range: f32;
        @group(0) @binding(0) var<storage, read_write> data: array<f32>;
        @compute @workgroup_size(1)
        fn touch(@builtin(global_invocation_id) id: vec3<u32>) {
            data[id.x] = launch_range;
        }
    ";
    let backend = HostBackend::new().with_kernel("touch", |_: &HostLaunch<'_>| Ok(()));
    let Err(ComputeError::Compile { log }) = ComputeContext::new(backend, source) else {
        panic!("expected compile error");
    };
    assert!(log.contains("launch range"));
}

#[test]
fn invalid_source_fails_with_compiler_log() {
    let result = ComputeContext::new(HostBackend::new(), "fn broken( {");
    match result {
        Err(ComputeError::Compile { log }) => assert!(!log.is_empty()),
        Err(other) => panic!("expected compile error, got {other}"),
        Ok(_) => panic!("expected compile error"),
    }
}

#[test]
fn entry_point_without_host_implementation_fails_build() {
    let backend = HostBackend::new().with_kernel("addBuffers", add_buffers);
    let result = ComputeContext::new(backend, SOURCE);
    let Err(ComputeError::Compile { log }) = result else {
        panic!("expected compile error");
    };
    assert!(log.contains("'scale'"));
    assert!(log.contains("'copyFrom'"));
    assert!(!log.contains("'addBuffers'"));
}

#[test]
fn parameters_outside_group_zero_are_rejected() {
    let source = r"
        @group(2) @binding(0) var<storage, read_write> data: array<f32>;
        @compute @workgroup_size(1)
        fn touch(@builtin(global_invocation_id) id: vec3<u32>) {
            data[id.x] = 1.0;
        }
    ";
    let backend = HostBackend::new().with_kernel("touch", |_: &HostLaunch<'_>| Ok(()));
    let result = ComputeContext::new(backend, source);
    let Err(ComputeError::Compile { log }) = result else {
        panic!("expected compile error");
    };
    assert!(log.contains("@group(2)"));
}

#[test]
fn assembled_source_builds() {
    let source = KernelSource::new()
        .define("SCALE", "2.0")
        .fragment(
            "@group(0) @binding(0) var<storage, read_write> data: array<f32>; // output
             @compute @workgroup_size(1)
             fn doubleAll(@builtin(global_invocation_id) id: vec3<u32>) {
                 data[id.x] = data[id.x] * SCALE;
             }",
        )
        .build();
    let backend = HostBackend::new().with_kernel("doubleAll", |_: &HostLaunch<'_>| Ok(()));
    let ctx = ComputeContext::new(backend, &source).unwrap();
    assert!(ctx.program().layout().signature("doubleAll").is_some());
}

// ============================================================================
// Kernel Registry Tests
// ============================================================================

#[test]
fn create_kernel_defaults_range_to_one() {
    let mut ctx = context();
    let id = ctx.create_kernel("addBuffers", None).unwrap();
    assert_eq!(ctx.kernel_range(id).unwrap(), 1);
    assert_eq!(ctx.kernel_name(id).unwrap(), "addBuffers");
    assert_eq!(ctx.kernel_id("addBuffers").unwrap(), id);
}

#[test]
fn create_kernel_with_explicit_range() {
    let mut ctx = context();
    let id = ctx.create_kernel("scale", Some(256)).unwrap();
    assert_eq!(ctx.kernel_range(id).unwrap(), 256);

    ctx.set_range(id, 1000).unwrap();
    assert_eq!(ctx.kernel_range(id).unwrap(), 1000);
}

#[test]
fn create_kernel_rejects_unknown_entry_point() {
    let mut ctx = context();
    let err = ctx.create_kernel("subBuffers", None).unwrap_err();
    assert!(matches!(err, ComputeError::UnknownEntryPoint(ref name) if name == "subBuffers"));
    assert!(ctx.kernel_id("subBuffers").is_err());
}

#[test]
fn create_kernel_rejects_duplicate_name() {
    let mut ctx = context();
    let first = ctx.create_kernel("addBuffers", Some(10)).unwrap();
    let err = ctx.create_kernel("addBuffers", Some(20)).unwrap_err();

    assert!(matches!(err, ComputeError::DuplicateKernel(_)));
    assert_eq!(ctx.kernel_id("addBuffers").unwrap(), first);
    assert_eq!(ctx.kernel_range(first).unwrap(), 10);
}

#[test]
fn kernel_lookup_by_unknown_name_fails() {
    let ctx = context();
    assert!(matches!(
        ctx.kernel_id("nothing"),
        Err(ComputeError::KernelNotFound(_))
    ));
}

#[test]
fn kernel_names_lists_registered_kernels() {
    let mut ctx = context();
    ctx.create_kernel("scale", None).unwrap();
    ctx.create_kernel("copyFrom", None).unwrap();

    let mut names: Vec<&str> = ctx.kernel_names().collect();
    names.sort_unstable();
    assert_eq!(names, ["copyFrom", "scale"]);
}

// ============================================================================
// Parameter Binding Tests
// ============================================================================

#[test]
fn set_param_buffers_binds_consecutive_slots() {
    let mut ctx = context();
    let a = ctx.create_buffer::<f32>("a", 8, None).unwrap();
    let b = ctx.create_buffer::<f32>("b", 8, None).unwrap();
    let k = ctx.create_kernel("addBuffers", None).unwrap();

    ctx.set_param_buffers(k, 0, &[a, b]).unwrap();
    assert_eq!(ctx.slot_binding(k, 0).unwrap().unwrap().buffer(), Some(a));
    assert_eq!(ctx.slot_binding(k, 1).unwrap().unwrap().buffer(), Some(b));

    ctx.set_param_buffers(k, 0, &[b, a]).unwrap();
    assert_eq!(ctx.slot_binding(k, 0).unwrap().unwrap().buffer(), Some(b));
    assert_eq!(ctx.slot_binding(k, 1).unwrap().unwrap().buffer(), Some(a));
}

#[test]
fn set_param_buffers_at_offset_leaves_lower_slots() {
    let mut ctx = context();
    let a = ctx.create_buffer::<f32>("a", 8, None).unwrap();
    let b = ctx.create_buffer::<f32>("b", 8, None).unwrap();
    let k = ctx.create_kernel("addBuffers", None).unwrap();

    ctx.set_param_buffers(k, 0, &[a, a]).unwrap();
    ctx.set_param_buffers(k, 1, &[b]).unwrap();
    assert_eq!(ctx.slot_binding(k, 0).unwrap().unwrap().buffer(), Some(a));
    assert_eq!(ctx.slot_binding(k, 1).unwrap().unwrap().buffer(), Some(b));
}

#[test]
fn failed_multi_bind_changes_nothing() {
    let mut ctx = context();
    let a = ctx.create_buffer::<f32>("a", 8, None).unwrap();
    let b = ctx.create_buffer::<f32>("b", 8, None).unwrap();
    let k = ctx.create_kernel("addBuffers", None).unwrap();

    let err = ctx.set_param_buffers(k, 0, &[a, b, a]).unwrap_err();
    assert!(matches!(err, ComputeError::UnknownSlot { slot: 2, .. }));
    assert!(ctx.slot_binding(k, 0).unwrap().is_none());
    assert!(ctx.slot_binding(k, 1).unwrap().is_none());
}

#[test]
fn fixed_size_slot_needs_a_buffer_that_covers_it() {
    let source = r"
        struct Block { origin: vec4<f32>, weights: array<f32, 4> }
        @group(0) @binding(0) var<storage, read_write> table: array<f32, 16>;
        @group(0) @binding(1) var<storage, read> block: Block;
        @group(0) @binding(2) var<storage, read_write> tail: array<f32>;
        @compute @workgroup_size(16)
        fn gather(@builtin(global_invocation_id) id: vec3<u32>) {
            table[id.x] = block.origin.x + block.weights[id.x % 4u];
            tail[0] = table[0];
        }
    ";
    let backend = HostBackend::new().with_kernel("gather", |_: &HostLaunch<'_>| Ok(()));
    let mut ctx = ComputeContext::new(backend, source).unwrap();
    let k = ctx.create_kernel("gather", Some(16)).unwrap();

    let short = ctx.create_buffer::<f32>("short", 4, None).unwrap();
    let table = ctx.create_buffer::<f32>("table", 16, None).unwrap();
    let block = ctx.create_buffer::<f32>("block", 8, None).unwrap();
    let one = ctx.create_buffer::<f32>("one", 1, None).unwrap();

    let err = ctx.set_param_buffers(k, 0, &[short]).unwrap_err();
    assert!(matches!(
        err,
        ComputeError::CapacityExceeded { ref buffer, count: 16, capacity: 4, .. } if buffer == "short"
    ));
    assert!(ctx.slot_binding(k, 0).unwrap().is_none());

    let err = ctx.set_param_buffers(k, 1, &[short]).unwrap_err();
    assert!(matches!(err, ComputeError::CapacityExceeded { count: 8, .. }));

    ctx.set_param_buffers(k, 0, &[table, block, one]).unwrap();
    assert_eq!(ctx.slot_binding(k, 2).unwrap().unwrap().buffer(), Some(one));
}

#[test]
fn value_into_buffer_slot_is_rejected() {
    let mut ctx = context();
    let k = ctx.create_kernel("scale", None).unwrap();
    let err = ctx.set_param_value(k, 0, 2.0_f32).unwrap_err();
    assert!(matches!(
        err,
        ComputeError::SlotKindMismatch {
            slot: 0,
            expected: "buffer",
            found: "value",
            ..
        }
    ));
}

#[test]
fn buffer_into_value_slot_is_rejected() {
    let mut ctx = context();
    let a = ctx.create_buffer::<f32>("a", 8, None).unwrap();
    let k = ctx.create_kernel("scale", None).unwrap();
    let err = ctx.set_param_buffers(k, 2, &[a]).unwrap_err();
    assert!(matches!(
        err,
        ComputeError::SlotKindMismatch {
            slot: 2,
            expected: "value",
            found: "buffer",
            ..
        }
    ));
}

#[test]
fn value_of_wrong_size_is_rejected() {
    let mut ctx = context();
    let k = ctx.create_kernel("scale", None).unwrap();
    let err = ctx.set_param_value(k, 2, [1.0_f32, 2.0]).unwrap_err();
    assert!(matches!(
        err,
        ComputeError::ValueSizeMismatch {
            expected: 4,
            found: 8,
            ..
        }
    ));
    assert!(ctx.slot_binding(k, 2).unwrap().is_none());
}

#[test]
fn undeclared_slot_is_rejected() {
    let mut ctx = context();
    let k = ctx.create_kernel("scale", None).unwrap();
    let err = ctx.set_param_value(k, 7, 1.0_f32).unwrap_err();
    assert!(matches!(err, ComputeError::UnknownSlot { slot: 7, .. }));
}

#[test]
fn buffer_element_must_match_array_stride() {
    let mut ctx = context();
    let scalars = ctx.create_buffer::<f32>("scalars", 8, None).unwrap();
    let vectors = ctx.create_buffer::<[f32; 4]>("vectors", 8, None).unwrap();
    let k = ctx.create_kernel("clearPoints", None).unwrap();

    let err = ctx.set_param_buffers(k, 4, &[scalars]).unwrap_err();
    assert!(matches!(
        err,
        ComputeError::ElementSizeMismatch {
            expected: 16,
            found: 4,
            ..
        }
    ));
    ctx.set_param_buffers(k, 4, &[vectors]).unwrap();
}

#[test]
fn rebinding_a_value_uses_the_latest_value() {
    let mut ctx = context();
    let a = ctx.create_buffer("a", 4, Some(&[1.0_f32, 2.0, 3.0, 4.0][..])).unwrap();
    let k = ctx.create_kernel("scale", Some(4)).unwrap();
    ctx.set_param_buffers(k, 0, &[a]).unwrap();

    ctx.set_param_value(k, 2, 10.0_f32).unwrap();
    ctx.set_param_value(k, 2, 3.0_f32).unwrap();
    ctx.run(k).unwrap();

    assert_eq!(
        ctx.read_buffer_vec::<f32>(a, 4, 0).unwrap(),
        vec![3.0, 6.0, 9.0, 12.0]
    );
}

#[test]
fn read_only_slot_feeds_writable_slot() {
    let mut ctx = context();
    let dst = ctx.create_buffer::<f32>("dst", 3, None).unwrap();
    let src = ctx.create_buffer("src", 3, Some(&[7.0_f32, 8.0, 9.0][..])).unwrap();
    let k = ctx.create_kernel("copyFrom", Some(3)).unwrap();

    ctx.set_param_buffers(k, 0, &[dst]).unwrap();
    ctx.set_param_buffers(k, 3, &[src]).unwrap();
    ctx.run(k).unwrap();

    assert_eq!(ctx.read_buffer_vec::<f32>(dst, 3, 0).unwrap(), vec![7.0, 8.0, 9.0]);
}

// ============================================================================
// Dispatch Tests
// ============================================================================

#[test]
fn run_with_unbound_slot_fails_and_leaves_buffers() {
    let mut ctx = context();
    let a = ctx.create_buffer("a", 2, Some(&[1.0_f32, 1.0][..])).unwrap();
    let k = ctx.create_kernel("addBuffers", Some(2)).unwrap();
    ctx.set_param_buffers(k, 0, &[a]).unwrap();

    let err = ctx.run(k).unwrap_err();
    assert!(matches!(err, ComputeError::UnboundSlot { slot: 1, .. }));
    assert_eq!(ctx.read_buffer_vec::<f32>(a, 2, 0).unwrap(), vec![1.0, 1.0]);
}

#[test]
fn run_with_removed_buffer_fails() {
    let mut ctx = context();
    let a = ctx.create_buffer::<f32>("a", 2, None).unwrap();
    let b = ctx.create_buffer::<f32>("b", 2, None).unwrap();
    let k = ctx.create_kernel("addBuffers", Some(2)).unwrap();
    ctx.set_param_buffers(k, 0, &[a, b]).unwrap();

    ctx.remove_buffer(b).unwrap();
    assert!(matches!(ctx.run(k), Err(ComputeError::BufferNotFound(_))));
}

#[test]
fn run_with_zero_range_fails() {
    let mut ctx = context();
    let a = ctx.create_buffer::<f32>("a", 2, None).unwrap();
    let b = ctx.create_buffer::<f32>("b", 2, None).unwrap();
    let k = ctx.create_kernel("addBuffers", Some(0)).unwrap();
    ctx.set_param_buffers(k, 0, &[a, b]).unwrap();

    assert!(matches!(
        ctx.run(k),
        Err(ComputeError::InvalidRange { range: 0, .. })
    ));
}

#[test]
fn kernel_error_surfaces_from_run() {
    let backend = host().with_kernel("scale", |_: &HostLaunch<'_>| {
        Err(ComputeError::Backend("device lost".to_string()))
    });
    let mut ctx = ComputeContext::new(backend, SOURCE).unwrap();
    let a = ctx.create_buffer::<f32>("a", 2, None).unwrap();
    let k = ctx.create_kernel("scale", None).unwrap();
    ctx.set_param_buffers(k, 0, &[a]).unwrap();
    ctx.set_param_value(k, 2, 1.0_f32).unwrap();

    let err = ctx.run(k).unwrap_err();
    assert!(matches!(err, ComputeError::Backend(_)));
    assert!(!err.is_recoverable());
}
