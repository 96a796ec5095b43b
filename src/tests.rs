use crate::*;
use memoffset::offset_of;
use rand::Rng;
use std::any::Any;
use std::cell::{Cell, RefCell};

thread_local! {
    static DESTROYED: RefCell<Vec<Handle>> = RefCell::new(Vec::new());
    static DEBUGGED: RefCell<Vec<(Handle, u32, f32)>> = RefCell::new(Vec::new());
    static FAIL_CREATE: Cell<bool> = Cell::new(false);
    static WARNINGS: RefCell<Vec<String>> = RefCell::new(Vec::new());
}

struct WarnLog;

impl log::Log for WarnLog {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::Level::Warn
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            WARNINGS.with(|w| w.borrow_mut().push(record.args().to_string()));
        }
    }

    fn flush(&self) {}
}

static WARN_LOG: WarnLog = WarnLog;

/// Returns warnings logged on this thread since the last call.
fn take_warnings() -> Vec<String> {
    if log::set_logger(&WARN_LOG).is_ok() {
        log::set_max_level(log::LevelFilter::Warn);
    }
    WARNINGS.with(|w| std::mem::take(&mut *w.borrow_mut()))
}

fn destroyed() -> Vec<Handle> {
    DESTROYED.with(|d| d.borrow().clone())
}

#[derive(Default, Values)]
struct Transform {
    #[value]
    id: u32,
    #[value]
    pos: [f32; 3],
    updates: u32,
}

impl Component for Transform {
    const UPDATE_STAGES: &'static [UpdateStage] = &[UpdateStage::Stage1];

    fn destroy(&mut self, ctx: &DestroyCtx<'_>) {
        DESTROYED.with(|d| d.borrow_mut().push(ctx.handle()));
    }

    fn update(_stage: UpdateStage, ctx: &mut UpdateCtx<'_, Self>) {
        for item in ctx.iter_mut() {
            item.data.updates += 1;
        }
    }

    fn debug(&self, ctx: &DebugCtx<'_>) {
        let scale = ctx.view::<f32>().copied().unwrap_or(0.0);
        DEBUGGED.with(|d| d.borrow_mut().push((ctx.handle(), self.id, scale)));
    }
}

#[derive(Default, Values)]
struct Model {
    #[value(modify = Model::on_name)]
    name: String,
    #[value]
    mesh: Handle,
    #[value]
    material: Handle,
    #[value]
    tags: [String; 3],
    #[value]
    xform: Mat3,
    #[value]
    visible: bool,
    #[value]
    cell: [i32; 2],
    #[value]
    color: [f32; 4],
    #[value]
    layer: i32,
    renames: u32,
}

impl Model {
    fn on_name(&mut self, _ctx: &mut ModifyCtx<'_>) -> anyhow::Result<()> {
        if self.name.is_empty() {
            anyhow::bail!("empty model name");
        }
        self.renames += 1;
        Ok(())
    }
}

impl Component for Model {}

#[derive(Default, Values)]
struct Mesh {
    #[value]
    lod: i32,
    #[value]
    sub: Handle,
}

impl Component for Mesh {
    fn destroy(&mut self, ctx: &DestroyCtx<'_>) {
        DESTROYED.with(|d| d.borrow_mut().push(ctx.handle()));
    }
}

#[derive(Default, Values)]
struct Geometry {
    #[value(modify = Geometry::rebuild)]
    radius: f32,
    #[value(name = "h", modify = Geometry::rebuild)]
    height: f32,
    #[value]
    label: String,
    rebuilds: u32,
}

impl Geometry {
    fn rebuild(&mut self, _ctx: &mut ModifyCtx<'_>) -> anyhow::Result<()> {
        self.rebuilds += 1;
        if self.radius < 0.0 {
            anyhow::bail!("negative radius");
        }
        Ok(())
    }
}

impl Component for Geometry {}

#[derive(Default)]
struct Ticker {
    ticks: u32,
}

impl Values for Ticker {}

impl Component for Ticker {
    const UPDATE_STAGES: &'static [UpdateStage] = &[UpdateStage::Stage1];

    fn update(_stage: UpdateStage, ctx: &mut UpdateCtx<'_, Self>) {
        for item in ctx.iter_mut() {
            item.data.ticks += 1;
        }
    }
}

#[derive(Default, Values)]
struct Spawner {
    #[value]
    target: Handle,
    param_hits: u32,
}

impl Component for Spawner {
    const UPDATE_STAGES: &'static [UpdateStage] = &[UpdateStage::Stage3];

    fn update(stage: UpdateStage, ctx: &mut UpdateCtx<'_, Self>) {
        assert_eq!(ctx.stage(), stage);

        let hit = match ctx.param::<u32>() {
            Some(p) => {
                *p += 1;
                1
            }
            None => 0,
        };
        let targets: Vec<Handle> = ctx.iter().map(|(_, s)| s.target).collect();
        for item in ctx.iter_mut() {
            item.data.param_hits += hit;
        }
        for target in targets {
            ctx.schedule(target);
        }
    }
}

#[derive(Default)]
struct Flaky;

impl Values for Flaky {}

impl Component for Flaky {
    fn create(&mut self, _ctx: &CreateCtx<'_>) -> anyhow::Result<()> {
        if FAIL_CREATE.with(|f| f.get()) {
            anyhow::bail!("device lost");
        }
        Ok(())
    }
}

struct Huge([u64; 1 << 17]);

impl Default for Huge {
    fn default() -> Self {
        Huge([0; 1 << 17])
    }
}

impl Values for Huge {}

impl Component for Huge {}

#[derive(Default)]
struct Solo;

impl Values for Solo {}

impl Component for Solo {}

const TRANSFORM_TAG: TypeTag = 1;

struct Ids {
    transform: ComponentId,
    model: ComponentId,
    mesh: ComponentId,
    geometry: ComponentId,
    ticker: ComponentId,
    spawner: ComponentId,
}

fn setup() -> (ComponentRegistry, Ids) {
    DESTROYED.with(|d| d.borrow_mut().clear());
    DEBUGGED.with(|d| d.borrow_mut().clear());
    FAIL_CREATE.with(|f| f.set(false));

    let mut reg = ComponentRegistry::new();
    let ids = Ids {
        transform: reg
            .register::<Transform>(
                ComponentParams::new("transform", TRANSFORM_TAG)
                    .flags(ComponentFlags::SHORTCUT)
                    .initial_count(4)
                    .grow_count(2),
            )
            .unwrap(),
        model: reg
            .register::<Model>(ComponentParams::new("model", 2))
            .unwrap(),
        mesh: reg
            .register::<Mesh>(ComponentParams::new("mesh", 3).initial_count(2).grow_count(1))
            .unwrap(),
        geometry: reg
            .register::<Geometry>(
                ComponentParams::new("geometry", 4).flags(ComponentFlags::DEFERRED_MODIFY),
            )
            .unwrap(),
        ticker: reg
            .register::<Ticker>(
                ComponentParams::new("ticker", 5).flags(ComponentFlags::ALWAYS_UPDATE),
            )
            .unwrap(),
        spawner: reg
            .register::<Spawner>(ComponentParams::new("spawner", 6))
            .unwrap(),
    };
    (reg, ids)
}

fn attach(reg: &mut ComponentRegistry, id: ComponentId, object: ObjectId) -> Handle {
    reg.create_instance(id, InstanceOwner::Object(object)).unwrap()
}

fn child_of(reg: &mut ComponentRegistry, id: ComponentId, parent: Handle, offset: usize) -> Handle {
    reg.create_instance(id, InstanceOwner::Parent { handle: parent, offset })
        .unwrap()
}

#[test]
fn registration() {
    let (mut reg, ids) = setup();

    assert_eq!(reg.component_count(), 6);
    assert_eq!(ids.transform.get(), 1);
    assert_eq!(ids.model.get(), 2);
    assert_eq!(ids.spawner.get(), 6);

    assert_eq!(reg.find_by_name("TRANSFORM"), Some(ids.transform));
    assert_eq!(reg.find_by_name("Mesh"), Some(ids.mesh));
    assert_eq!(reg.find_by_name("camera"), None);
    assert_eq!(reg.find_by_tag(4), Some(ids.geometry));
    assert_eq!(reg.find_by_tag(99), None);
    assert_eq!(reg.component_id::<Ticker>(), Some(ids.ticker));
    assert_eq!(reg.component_id::<Solo>(), None);
    assert_eq!(reg.component_name(ids.mesh).unwrap(), "mesh");
    assert_eq!(reg.component_tag(ids.model).unwrap(), 2);
    assert!(reg
        .component_flags(ids.geometry)
        .unwrap()
        .contains(ComponentFlags::DEFERRED_MODIFY));
    assert_eq!(reg.capacity(ids.transform).unwrap(), 4);
    assert_eq!(
        reg.capacity(ids.model).unwrap(),
        ComponentParams::DEFAULT_INITIAL_COUNT as usize
    );

    assert!(matches!(
        reg.register::<Solo>(ComponentParams::new("Transform", 50)),
        Err(ComponentError::DuplicateName(_))
    ));
    assert!(matches!(
        reg.register::<Solo>(ComponentParams::new("solo", TRANSFORM_TAG)),
        Err(ComponentError::DuplicateTag(TRANSFORM_TAG))
    ));
    assert!(matches!(
        reg.register::<Solo>(ComponentParams::new("", 50)),
        Err(ComponentError::InvalidParams { .. })
    ));
    assert!(matches!(
        reg.register::<Solo>(ComponentParams::new("solo", 50).grow_count(0)),
        Err(ComponentError::InvalidParams { .. })
    ));
    assert_eq!(reg.component_count(), 6);

    let solo = reg.register::<Solo>(ComponentParams::new("solo", 50)).unwrap();
    assert_eq!(solo.get(), 7);
}

#[test]
fn rejected_registration_is_logged() {
    let (mut reg, _) = setup();
    take_warnings();

    assert!(reg
        .register::<Solo>(ComponentParams::new("MODEL", 50))
        .is_err());
    assert!(reg
        .register::<Solo>(ComponentParams::new("solo", 2))
        .is_err());
    assert!(reg
        .register::<Solo>(ComponentParams::new("solo", 50).grow_count(0))
        .is_err());

    let warnings = take_warnings();
    assert_eq!(warnings.len(), 3);
    assert!(warnings.iter().all(|w| w.starts_with("Rejected component")));
    assert!(warnings[0].contains("'MODEL'"));

    reg.register::<Solo>(ComponentParams::new("solo", 50)).unwrap();
    assert!(take_warnings().is_empty());
}

#[test]
fn swap_trick_rewrites_back_references() {
    let (mut reg, ids) = setup();

    let oa = reg.create_object("a");
    let ob = reg.create_object("b");
    let oc = reg.create_object("c");

    let ha = attach(&mut reg, ids.transform, oa);
    let hb = attach(&mut reg, ids.transform, ob);
    let hc = attach(&mut reg, ids.transform, oc);
    for (i, h) in [ha, hb, hc].into_iter().enumerate() {
        reg.instance_mut::<Transform>(h).unwrap().id = i as u32 + 1;
    }

    reg.destroy_instance(hb).unwrap();

    assert_eq!(destroyed(), vec![hb]);
    assert_eq!(reg.find_instance(oc, ids.transform).unwrap(), hb);
    assert_eq!(reg.object(oc).unwrap().components(), &[hb]);
    assert_eq!(reg.object(oc).unwrap().shortcut(TRANSFORM_TAG), Some(hb));
    assert!(reg.object(ob).unwrap().components().is_empty());
    assert_eq!(reg.object(ob).unwrap().shortcut(TRANSFORM_TAG), None);

    assert!(!reg.is_alive(hc));
    assert!(matches!(
        reg.instance::<Transform>(hc),
        Err(ComponentError::InvalidHandle(h)) if h == hc
    ));
    assert_eq!(reg.instance::<Transform>(hb).unwrap().id, 3);
    assert_eq!(reg.instance::<Transform>(ha).unwrap().id, 1);

    assert_eq!(reg.instances(ids.transform).unwrap().collect::<Vec<_>>(), vec![ha, hb]);
    assert_eq!(reg.scheduled(ids.transform).unwrap().collect::<Vec<_>>(), vec![ha, hb]);
    assert!(matches!(
        reg.find_instance(ob, ids.transform),
        Err(ComponentError::NotAttached { .. })
    ));

    // Destroying the last instance moves nothing.
    reg.destroy_instance(hb).unwrap();
    assert_eq!(reg.instances(ids.transform).unwrap().collect::<Vec<_>>(), vec![ha]);
    assert_eq!(reg.find_instance(oa, ids.transform).unwrap(), ha);
    assert!(matches!(
        reg.destroy_instance(hb),
        Err(ComponentError::InvalidHandle(_))
    ));
}

#[test]
fn growth_preserves_content_and_scheduling() {
    let (mut reg, ids) = setup();
    let obj = reg.create_object("crowd");

    let mut handles = Vec::new();
    for i in 0..4 {
        let h = attach(&mut reg, ids.transform, obj);
        let t = reg.instance_mut::<Transform>(h).unwrap();
        t.id = i;
        t.pos = [i as f32, 1.0, 2.0];
        handles.push(h);
    }
    assert_eq!(reg.capacity(ids.transform).unwrap(), 4);

    handles.push(attach(&mut reg, ids.transform, obj));
    assert_eq!(reg.capacity(ids.transform).unwrap(), 6);
    assert_eq!(reg.scheduled(ids.transform).unwrap().count(), 5);

    reg.update(UpdateStage::Stage1, 0.016, None);

    for (i, &h) in handles.iter().enumerate() {
        let t = reg.instance::<Transform>(h).unwrap();
        assert_eq!(t.updates, 1);
        if i < 4 {
            assert_eq!(t.id, i as u32);
            assert_eq!(t.pos, [i as f32, 1.0, 2.0]);
        }
    }
    assert_eq!(reg.object(obj).unwrap().components(), &handles[..]);
}

#[test]
fn scheduler_idempotence_and_always_update() {
    let (mut reg, ids) = setup();
    let obj = reg.create_object("clock");
    let t = attach(&mut reg, ids.transform, obj);
    let k = attach(&mut reg, ids.ticker, obj);

    reg.subscribe(t).unwrap();
    reg.subscribe(t).unwrap();
    assert_eq!(reg.scheduled(ids.transform).unwrap().count(), 1);
    assert!(reg.is_scheduled(t).unwrap());

    reg.update(UpdateStage::Stage1, 0.016, None);
    // Not a stage of either component.
    reg.update(UpdateStage::Stage5, 0.016, None);
    assert_eq!(reg.instance::<Transform>(t).unwrap().updates, 1);
    assert_eq!(reg.instance::<Ticker>(k).unwrap().ticks, 1);

    for _ in 0..3 {
        reg.clear_updates();
        assert_eq!(reg.scheduled(ids.transform).unwrap().count(), 0);
        assert_eq!(reg.scheduled(ids.ticker).unwrap().collect::<Vec<_>>(), vec![k]);
        reg.update(UpdateStage::Stage1, 0.016, None);
    }
    assert_eq!(reg.instance::<Transform>(t).unwrap().updates, 1);
    assert_eq!(reg.instance::<Ticker>(k).unwrap().ticks, 4);
    assert!(!reg.is_scheduled(t).unwrap());

    reg.subscribe(t).unwrap();
    reg.update(UpdateStage::Stage1, 0.016, None);
    assert_eq!(reg.instance::<Transform>(t).unwrap().updates, 2);

    reg.unsubscribe(t).unwrap();
    reg.unsubscribe(t).unwrap();
    reg.update(UpdateStage::Stage1, 0.016, None);
    assert_eq!(reg.instance::<Transform>(t).unwrap().updates, 2);

    assert!(reg.subscribe(Handle::INVALID).is_err());
}

#[test]
fn update_params_and_schedule_requests() {
    let (mut reg, ids) = setup();
    let obj = reg.create_object("factory");
    let t = attach(&mut reg, ids.transform, obj);
    let s = attach(&mut reg, ids.spawner, obj);
    reg.set_value(s, "target", Value::Handle(t)).unwrap();

    reg.clear_updates();
    assert!(!reg.is_scheduled(t).unwrap());
    reg.subscribe(s).unwrap();

    let mut counter = 5u32;
    reg.update(UpdateStage::Stage3, 0.016, Some(&mut counter as &mut dyn Any));
    assert_eq!(counter, 6);
    assert!(reg.is_scheduled(t).unwrap());
    assert_eq!(reg.instance::<Spawner>(s).unwrap().param_hits, 1);

    let mut wrong = 1.5f64;
    reg.update(UpdateStage::Stage3, 0.016, Some(&mut wrong as &mut dyn Any));
    assert_eq!(reg.instance::<Spawner>(s).unwrap().param_hits, 1);

    // A stale target is dropped.
    reg.set_value(s, "target", Value::Handle(Handle::new(TRANSFORM_TAG, 0, 77)))
        .unwrap();
    reg.update(UpdateStage::Stage3, 0.016, None);
    assert_eq!(reg.scheduled(ids.transform).unwrap().count(), 1);
}

#[test]
fn parent_child_links() {
    let (mut reg, ids) = setup();
    let obj = reg.create_object("tank");
    let m = attach(&mut reg, ids.model, obj);

    let mesh_off = offset_of!(Model, mesh);
    let mat_off = offset_of!(Model, material);
    let c1 = child_of(&mut reg, ids.mesh, m, mesh_off);
    let c2 = child_of(&mut reg, ids.mesh, m, mat_off);
    let g = child_of(&mut reg, ids.transform, c2, offset_of!(Mesh, sub));

    let model = reg.instance::<Model>(m).unwrap();
    assert_eq!(model.mesh, c1);
    assert_eq!(model.material, c2);
    assert_eq!(reg.instance::<Mesh>(c2).unwrap().sub, g);
    assert_eq!(reg.instance_children(m).unwrap(), &[c1, c2]);
    assert_eq!(reg.instance_parent(c1).unwrap(), Some(m));
    assert_eq!(reg.instance_parent(m).unwrap(), None);
    assert_eq!(
        reg.instance_owner(c2).unwrap(),
        InstanceOwner::Parent {
            handle: m,
            offset: mat_off
        }
    );
    assert_eq!(reg.instance_owner(m).unwrap(), InstanceOwner::Object(obj));
    assert!(reg
        .instance_flags(c1)
        .unwrap()
        .contains(InstanceFlags::INDIRECT_HOST));
    assert!(reg.instance_flags(m).unwrap().is_empty());
    assert_eq!(reg.instance_host(g).unwrap(), obj);

    // Children are not part of the object chain.
    assert_eq!(reg.object(obj).unwrap().components(), &[m]);
    // Handles are only written into `Handle` values.
    assert!(matches!(
        reg.create_instance(
            ids.mesh,
            InstanceOwner::Parent {
                handle: m,
                offset: offset_of!(Model, layer)
            }
        ),
        Err(ComponentError::InvalidParentOffset { .. })
    ));
    assert!(matches!(
        reg.create_instance(
            ids.mesh,
            InstanceOwner::Parent {
                handle: Handle::INVALID,
                offset: mesh_off
            }
        ),
        Err(ComponentError::InvalidHandle(_))
    ));

    reg.destroy_instance(c1).unwrap();
    assert_eq!(reg.instance::<Model>(m).unwrap().mesh, Handle::INVALID);
    // c2 took over the slot of c1.
    assert_eq!(reg.instance::<Model>(m).unwrap().material, c1);
    assert_eq!(reg.instance_children(m).unwrap(), &[c1]);
    assert_eq!(reg.instance_parent(g).unwrap(), Some(c1));
    assert_eq!(reg.instance::<Mesh>(c1).unwrap().sub, g);
}

#[test]
fn parent_destruction_cascades() {
    let (mut reg, ids) = setup();
    let obj = reg.create_object("tank");
    let m = attach(&mut reg, ids.model, obj);
    let c1 = child_of(&mut reg, ids.mesh, m, offset_of!(Model, mesh));
    let c2 = child_of(&mut reg, ids.mesh, m, offset_of!(Model, material));
    let g = child_of(&mut reg, ids.transform, c1, offset_of!(Mesh, sub));

    reg.destroy_instance(m).unwrap();

    let gone = destroyed();
    assert_eq!(gone.len(), 3);
    assert!(gone.contains(&c1) && gone.contains(&c2) && gone.contains(&g));
    assert_eq!(reg.instance_count(ids.mesh).unwrap(), 0);
    assert_eq!(reg.instance_count(ids.model).unwrap(), 0);
    assert_eq!(reg.instance_count(ids.transform).unwrap(), 0);
    assert!(reg.object(obj).unwrap().components().is_empty());
}

#[test]
fn cascade_survives_sibling_swaps() {
    let (mut reg, ids) = setup();
    let mesh_off = offset_of!(Model, mesh);
    let mat_off = offset_of!(Model, material);

    let oq = reg.create_object("q");
    let q = attach(&mut reg, ids.model, oq);
    let qc = child_of(&mut reg, ids.mesh, q, mesh_off);
    reg.instance_mut::<Mesh>(qc).unwrap().lod = 7;

    let op = reg.create_object("p");
    let p = attach(&mut reg, ids.model, op);
    let a = child_of(&mut reg, ids.mesh, p, mesh_off);
    let b = child_of(&mut reg, ids.mesh, p, mat_off);

    let ox = reg.create_object("x");
    let x = attach(&mut reg, ids.mesh, ox);
    reg.instance_mut::<Mesh>(x).unwrap().lod = 99;
    assert_eq!([qc.slot(), a.slot(), b.slot(), x.slot()], [0, 1, 2, 3]);

    reg.destroy_instance(p).unwrap();

    assert_eq!(destroyed().len(), 2);
    assert_eq!(reg.instance_count(ids.mesh).unwrap(), 2);

    let q_model = reg.instance::<Model>(q).unwrap();
    assert_eq!(q_model.mesh, qc);
    assert_eq!(reg.instance::<Mesh>(qc).unwrap().lod, 7);

    let hx = reg.find_instance(ox, ids.mesh).unwrap();
    assert!(reg.is_alive(hx));
    assert_eq!(reg.instance::<Mesh>(hx).unwrap().lod, 99);
    assert_eq!(reg.instance_owner(hx).unwrap(), InstanceOwner::Object(ox));
}

#[test]
fn deferred_modify_batching() {
    let (mut reg, ids) = setup();
    let obj = reg.create_object("rock");
    let g = attach(&mut reg, ids.geometry, obj);

    // Every value with a modify callback starts dirty.
    assert_eq!(reg.deferred_count(), 1);
    reg.flush_deferred().unwrap();
    assert_eq!(reg.instance::<Geometry>(g).unwrap().rebuilds, 2);
    assert_eq!(reg.deferred_count(), 0);

    reg.set_value(g, "radius", Value::Float(1.0)).unwrap();
    reg.set_value(g, "radius", Value::Float(2.0)).unwrap();
    assert_eq!(reg.deferred_count(), 1);
    assert_eq!(reg.instance::<Geometry>(g).unwrap().rebuilds, 2);

    reg.flush_deferred().unwrap();
    assert_eq!(reg.instance::<Geometry>(g).unwrap().rebuilds, 3);
    assert_eq!(reg.deferred_count(), 0);

    reg.flush_deferred().unwrap();
    assert_eq!(reg.instance::<Geometry>(g).unwrap().rebuilds, 3);

    // No modify callback, nothing queued.
    reg.set_value(g, "label", Value::String("boulder".into())).unwrap();
    assert_eq!(reg.deferred_count(), 0);

    reg.set_value(g, "radius", Value::Float(-1.0)).unwrap();
    reg.set_value(g, "h", Value::Float(3.0)).unwrap();
    assert!(matches!(
        reg.flush_deferred(),
        Err(ComponentError::DeferredModifyFailed { failed: 2 })
    ));
    assert_eq!(reg.instance::<Geometry>(g).unwrap().rebuilds, 5);
    assert_eq!(reg.deferred_count(), 0);

    reg.set_value(g, "radius", Value::Float(3.0)).unwrap();
    reg.destroy_instance(g).unwrap();
    assert_eq!(reg.deferred_count(), 0);
}

#[test]
fn deferred_queue_follows_swaps() {
    let (mut reg, ids) = setup();
    let obj = reg.create_object("rocks");
    let g1 = attach(&mut reg, ids.geometry, obj);
    let g2 = attach(&mut reg, ids.geometry, obj);
    reg.flush_deferred().unwrap();

    reg.set_value(g2, "radius", Value::Float(4.0)).unwrap();
    reg.destroy_instance(g1).unwrap();
    assert_eq!(reg.deferred_count(), 1);

    reg.flush_deferred().unwrap();
    let moved = reg.instance::<Geometry>(g1).unwrap();
    assert_eq!(moved.radius, 4.0);
    assert_eq!(moved.rebuilds, 3);
    assert!(!reg.is_alive(g2));
}

#[test]
fn value_access() {
    let (mut reg, ids) = setup();
    let obj = reg.create_object("house");
    let m = attach(&mut reg, ids.model, obj);

    reg.set_value(m, "name", Value::String("tank".into())).unwrap();
    assert_eq!(reg.instance::<Model>(m).unwrap().renames, 1);
    assert_eq!(reg.get_value(m, "name").unwrap(), Value::String("tank".into()));

    assert!(matches!(
        reg.set_value(m, "name", Value::String(String::new())),
        Err(ComponentError::ModifyFailed { .. })
    ));
    assert_eq!(reg.instance::<Model>(m).unwrap().renames, 1);

    reg.set_value(m, "tags", Value::StringArray(vec!["a".into(), "b".into()]))
        .unwrap();
    assert_eq!(
        reg.get_value(m, "tags").unwrap(),
        Value::StringArray(vec!["a".into(), "b".into(), String::new()])
    );
    reg.set_value_at(m, "tags", 2, Value::String("c".into())).unwrap();
    assert_eq!(reg.get_value_at(m, "tags", 2).unwrap(), Value::String("c".into()));
    assert_eq!(reg.instance::<Model>(m).unwrap().tags, ["a", "b", "c"]);
    assert!(matches!(
        reg.get_value_at(m, "tags", 3),
        Err(ComponentError::IndexOutOfRange { index: 3, count: 3, .. })
    ));
    assert!(matches!(
        reg.set_value_at(m, "tags", 0, Value::Int(1)),
        Err(ComponentError::ValueKindMismatch {
            expected: ValueKind::String,
            found: ValueKind::Int,
            ..
        })
    ));

    let xform: Mat3 = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [4.0, 5.0, 6.0]];
    reg.set_value(m, "xform", Value::Matrix(xform)).unwrap();
    reg.set_value(m, "visible", Value::Bool(true)).unwrap();
    reg.set_value(m, "cell", Value::Int2([-1, 2])).unwrap();
    reg.set_value(m, "color", Value::Float4([0.1, 0.2, 0.3, 1.0])).unwrap();
    reg.set_value_at(m, "layer", 0, Value::Int(-3)).unwrap();

    let model = reg.instance::<Model>(m).unwrap();
    assert_eq!(model.xform, xform);
    assert!(model.visible);
    assert_eq!(model.cell, [-1, 2]);
    assert_eq!(model.color, [0.1, 0.2, 0.3, 1.0]);
    assert_eq!(model.layer, -3);
    assert_eq!(reg.get_value(m, "mesh").unwrap(), Value::Handle(Handle::INVALID));

    assert!(matches!(
        reg.set_value(m, "layer", Value::Float(1.0)),
        Err(ComponentError::ValueKindMismatch { .. })
    ));
    assert!(matches!(
        reg.set_value_at(m, "layer", 1, Value::Int(1)),
        Err(ComponentError::IndexOutOfRange { .. })
    ));
    assert!(matches!(
        reg.get_value(m, "nope"),
        Err(ComponentError::UnknownValue { .. })
    ));
    assert!(matches!(
        reg.get_value(Handle::INVALID, "name"),
        Err(ComponentError::InvalidHandle(_))
    ));

    assert_eq!(reg.value_kind(ids.model, "tags").unwrap(), ValueKind::StringArray);
    assert_eq!(reg.value_kind(ids.model, "mesh").unwrap(), ValueKind::Handle);
    assert_eq!(reg.value_kind(ids.geometry, "h").unwrap(), ValueKind::Float);
    assert!(reg.value_kind(ids.geometry, "height").is_err());
    assert_eq!(reg.values(ids.ticker).unwrap().count(), 0);
    assert_eq!(
        reg.values(ids.transform).unwrap().collect::<Vec<_>>(),
        vec![("id", ValueKind::UInt), ("pos", ValueKind::Float3)]
    );

    let t = attach(&mut reg, ids.transform, obj);
    reg.set_value(t, "pos", Value::Float3([1.0, 2.0, 3.0])).unwrap();
    assert_eq!(reg.instance::<Transform>(t).unwrap().pos, [1.0, 2.0, 3.0]);
    assert!(matches!(
        reg.instance::<Model>(t),
        Err(ComponentError::TypeMismatch { .. })
    ));
}

#[test]
fn failed_create_is_unwound() {
    let (mut reg, ids) = setup();
    let flaky = reg
        .register::<Flaky>(ComponentParams::new("flaky", 7).flags(ComponentFlags::SHORTCUT))
        .unwrap();
    let obj = reg.create_object("bad");
    let m = attach(&mut reg, ids.model, obj);

    FAIL_CREATE.with(|f| f.set(true));

    match reg.create_instance(flaky, InstanceOwner::Object(obj)) {
        Err(ComponentError::CreateFailed { component, source }) => {
            assert_eq!(component, "flaky");
            assert_eq!(source.to_string(), "device lost");
        }
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
    assert_eq!(reg.object(obj).unwrap().components(), &[m]);
    assert_eq!(reg.object(obj).unwrap().shortcut(7), None);
    assert_eq!(reg.instance_count(flaky).unwrap(), 0);
    assert_eq!(reg.scheduled(flaky).unwrap().count(), 0);

    let res = reg.create_instance(
        flaky,
        InstanceOwner::Parent {
            handle: m,
            offset: offset_of!(Model, mesh),
        },
    );
    assert!(res.is_err());
    assert_eq!(reg.instance::<Model>(m).unwrap().mesh, Handle::INVALID);
    assert!(reg.instance_children(m).unwrap().is_empty());

    // A child already stored in the parent field survives a failed sibling create.
    FAIL_CREATE.with(|f| f.set(false));
    let c1 = child_of(&mut reg, ids.mesh, m, offset_of!(Model, mesh));
    FAIL_CREATE.with(|f| f.set(true));
    let res = reg.create_instance(
        flaky,
        InstanceOwner::Parent {
            handle: m,
            offset: offset_of!(Model, mesh),
        },
    );
    assert!(res.is_err());
    assert_eq!(reg.instance::<Model>(m).unwrap().mesh, c1);
    assert_eq!(reg.instance_children(m).unwrap(), &[c1]);
    assert!(reg.is_alive(c1));

    FAIL_CREATE.with(|f| f.set(false));
    let h = attach(&mut reg, flaky, obj);
    assert_eq!(h.slot(), 0);
    assert_eq!(reg.object(obj).unwrap().shortcut(7), Some(h));
    assert_eq!(reg.find_instance_by_name(obj, "FLAKY").unwrap(), h);

    // The shortcut keeps pointing at the previous instance.
    FAIL_CREATE.with(|f| f.set(true));
    assert!(reg.create_instance(flaky, InstanceOwner::Object(obj)).is_err());
    assert_eq!(reg.object(obj).unwrap().components(), &[m, h]);
    assert_eq!(reg.object(obj).unwrap().shortcut(7), Some(h));
    assert_eq!(reg.find_instance(obj, flaky).unwrap(), h);
    FAIL_CREATE.with(|f| f.set(false));
}

#[test]
fn growth_out_of_memory_leaves_storage_intact() {
    let mut reg = ComponentRegistry::new();
    let huge = reg
        .register::<Huge>(ComponentParams::new("huge", 1).initial_count(0).grow_count(u32::MAX))
        .unwrap();
    let obj = reg.create_object("void");

    assert!(matches!(
        reg.create_instance(huge, InstanceOwner::Object(obj)),
        Err(ComponentError::OutOfMemory { .. })
    ));
    assert_eq!(reg.capacity(huge).unwrap(), 0);
    assert_eq!(reg.instance_count(huge).unwrap(), 0);
    assert!(reg.object(obj).unwrap().components().is_empty());

    assert!(matches!(
        reg.register::<Huge>(ComponentParams::new("huge2", 2).initial_count(u32::MAX)),
        Err(ComponentError::OutOfMemory { .. })
    ));
    assert_eq!(reg.component_count(), 1);
}

#[test]
fn singleton() {
    let mut reg = ComponentRegistry::new();
    let solo = reg
        .register::<Solo>(ComponentParams::new("solo", 1).flags(ComponentFlags::SINGLETON))
        .unwrap();
    let obj = reg.create_object("world");

    let h = attach(&mut reg, solo, obj);
    assert!(matches!(
        reg.create_instance(solo, InstanceOwner::Object(obj)),
        Err(ComponentError::SingletonViolation(_))
    ));
    reg.destroy_instance(h).unwrap();
    attach(&mut reg, solo, obj);
}

#[test]
fn debug_list() {
    let (mut reg, ids) = setup();
    let mut handles = Vec::new();
    for (i, name) in ["a", "b", "c"].into_iter().enumerate() {
        let obj = reg.create_object(name);
        let h = attach(&mut reg, ids.transform, obj);
        reg.instance_mut::<Transform>(h).unwrap().id = i as u32 + 1;
        handles.push(h);
    }
    let (t1, t2, t3) = (handles[0], handles[1], handles[2]);

    reg.debug_add(t3).unwrap();
    reg.debug_add(t3).unwrap();
    assert_eq!(reg.debug_handles(), &[t3]);
    assert!(reg.debug_add(Handle::INVALID).is_err());

    reg.destroy_instance(t1).unwrap();
    assert_eq!(reg.debug_handles(), &[t1]);

    reg.debug(0.5, &2.0f32);
    DEBUGGED.with(|d| assert_eq!(*d.borrow(), vec![(t1, 3, 2.0)]));

    reg.set_object_debug("b", "TRANSFORM", true).unwrap();
    assert_eq!(reg.debug_handles(), &[t1, t2]);
    reg.set_object_debug("b", "transform", false).unwrap();
    assert_eq!(reg.debug_handles(), &[t1]);

    assert!(matches!(
        reg.set_object_debug("zzz", "transform", true),
        Err(ComponentError::UnknownObjectName(_))
    ));
    assert!(matches!(
        reg.set_object_debug("a", "transform", true),
        Err(ComponentError::NotAttached { .. })
    ));
    assert!(matches!(
        reg.set_object_debug("b", "nope", true),
        Err(ComponentError::UnknownComponent(_))
    ));

    assert!(reg.debug_remove(t1));
    assert!(!reg.debug_remove(t1));

    // Destroyed instances leave the list.
    reg.debug_add(t2).unwrap();
    reg.destroy_instance(t2).unwrap();
    assert!(reg.debug_handles().is_empty());
}

#[test]
fn destroy_object_destroys_everything() {
    let (mut reg, ids) = setup();
    let obj = reg.create_object("ship");
    let other = reg.create_object("buoy");

    attach(&mut reg, ids.transform, obj);
    let m = attach(&mut reg, ids.model, obj);
    child_of(&mut reg, ids.mesh, m, offset_of!(Model, mesh));
    attach(&mut reg, ids.geometry, obj);
    let buoy = attach(&mut reg, ids.transform, other);
    reg.instance_mut::<Transform>(buoy).unwrap().id = 42;

    assert_eq!(reg.find_object("ship"), Some(obj));
    reg.destroy_object(obj).unwrap();

    assert!(reg.object(obj).is_none());
    assert_eq!(reg.find_object("ship"), None);
    assert_eq!(reg.object_count(), 1);
    assert_eq!(reg.instance_count(ids.model).unwrap(), 0);
    assert_eq!(reg.instance_count(ids.mesh).unwrap(), 0);
    assert_eq!(reg.instance_count(ids.geometry).unwrap(), 0);
    assert_eq!(reg.deferred_count(), 0);

    // The buoy took over the slot of the ship's transform.
    let moved = reg.find_instance(other, ids.transform).unwrap();
    assert_ne!(moved, buoy);
    assert!(!reg.is_alive(buoy));
    assert_eq!(reg.instances(ids.transform).unwrap().collect::<Vec<_>>(), vec![moved]);
    assert_eq!(reg.instance::<Transform>(moved).unwrap().id, 42);

    assert!(matches!(
        reg.destroy_object(obj),
        Err(ComponentError::UnknownObject(_))
    ));
    let again = reg.create_object("ship");
    assert_ne!(again, obj);
    assert!(matches!(
        reg.create_instance(ids.transform, InstanceOwner::Object(obj)),
        Err(ComponentError::UnknownObject(_))
    ));
}

#[test]
fn iterate_instances() {
    let (mut reg, ids) = setup();
    let obj = reg.create_object("row");
    for i in 0..6 {
        let h = attach(&mut reg, ids.transform, obj);
        reg.instance_mut::<Transform>(h).unwrap().id = i;
    }

    let ids_seen: Vec<u32> = reg.iter::<Transform>().unwrap().map(|(_, t)| t.id).collect();
    assert_eq!(ids_seen, vec![0, 1, 2, 3, 4, 5]);
    assert!(reg.iter::<Solo>().is_err());

    let handles: Vec<_> = reg.instances(ids.transform).unwrap().collect();
    for (h, (ih, _)) in handles.iter().zip(reg.iter::<Transform>().unwrap()) {
        assert_eq!(*h, ih);
    }
}

#[test]
fn random_create_destroy() {
    let (mut reg, ids) = setup();
    let mut rng = rand::thread_rng();

    // (object, component, expected payload)
    let mut live: Vec<(ObjectId, ComponentId, i64)> = Vec::new();

    for step in 0..3000 {
        if live.is_empty() || rng.gen_bool(0.55) {
            let obj = reg.create_object(format!("obj{step}"));
            let payload = rng.gen_range(0..1_000_000);
            if rng.gen_bool(0.5) {
                let h = attach(&mut reg, ids.transform, obj);
                reg.instance_mut::<Transform>(h).unwrap().id = payload as u32;
                live.push((obj, ids.transform, payload));
            } else {
                let h = attach(&mut reg, ids.mesh, obj);
                reg.instance_mut::<Mesh>(h).unwrap().lod = payload as i32;
                live.push((obj, ids.mesh, payload));
            }
        } else {
            let (obj, cid, _) = live.swap_remove(rng.gen_range(0..live.len()));
            let h = reg.find_instance(obj, cid).unwrap();
            if rng.gen_bool(0.5) {
                reg.destroy_instance(h).unwrap();
            }
            reg.destroy_object(obj).unwrap();
        }

        if step % 100 == 0 || step == 2999 {
            for &(obj, cid, payload) in &live {
                let h = reg.find_instance(obj, cid).unwrap();
                let value = if cid == ids.transform {
                    reg.instance::<Transform>(h).unwrap().id as i64
                } else {
                    reg.instance::<Mesh>(h).unwrap().lod as i64
                };
                assert_eq!(value, payload);
                assert_eq!(reg.instance_host(h).unwrap(), obj);
            }

            let transforms = live.iter().filter(|e| e.1 == ids.transform).count();
            assert_eq!(reg.instance_count(ids.transform).unwrap(), transforms);
            assert_eq!(reg.instance_count(ids.mesh).unwrap(), live.len() - transforms);
            assert_eq!(reg.object_count(), live.len());
        }
    }
}
