//! Shared test helpers for integration tests

use prism::ir::{
    AddressSpace, BinaryOp, BlockId, Builder, BuiltinFn, ConstValue, InstId, Module, Op, ValueId,
};

/// The parts of a counting loop that tests inspect
#[allow(dead_code)]
pub struct CountingLoop {
    pub loop_inst: InstId,
    /// The control variable declaration in the initializer
    pub lcv: InstId,
    /// The load of the control variable at the head of the body
    pub body_load: ValueId,
    /// The body block, for tests that add more instructions after the head
    pub body: BlockId,
}

/// Shape of a counting loop to build
#[allow(dead_code)]
pub struct LoopSpec {
    pub init: ConstValue,
    pub cmp: BinaryOp,
    pub limit: ConstValue,
    pub step: BinaryOp,
    pub amount: ConstValue,
    /// Put the `exit_loop` in the true arm instead of the false arm
    pub exit_on_true: bool,
}

/// Build the classic three-block counting loop:
///
/// ```text
/// loop {
///   initializer: var i = init; next_iteration
///   body:        load i; cmp(load, limit); if { } else { exit_loop }; continue
///   continuing:  load i; step(load, amount); store i; next_iteration
/// }
/// ```
#[allow(dead_code)]
pub fn counting_loop_with(module: &mut Module, block: BlockId, spec: LoopSpec) -> CountingLoop {
    let lcv_ty = match spec.init {
        ConstValue::I32(_) => module.types.i32(),
        ConstValue::U32(_) => module.types.u32(),
        _ => panic!("loop control variable must be an integer"),
    };
    let bool_ty = module.types.bool();

    let mut b = Builder::append_to(module, block);
    let loop_inst = b.loop_();
    let (initializer, body, continuing) = module.loop_blocks(loop_inst);

    let init = module.constant(spec.init);
    let mut b = Builder::append_to(module, initializer);
    let lcv_ptr = b.var_init(AddressSpace::Function, lcv_ty, init);
    b.next_iteration();
    let lcv = module.producer(lcv_ptr).unwrap();

    let limit = module.constant(spec.limit);
    let mut b = Builder::append_to(module, body);
    let body_load = b.load(lcv_ptr);
    let cond = b.binary(spec.cmp, bool_ty, body_load, limit);
    let if_inst = b.if_(cond);
    b.continue_();
    let (true_block, false_block) = module.if_blocks(if_inst);
    if spec.exit_on_true {
        let mut tb = Builder::append_to(module, true_block);
        tb.exit_loop();
        let mut fb = Builder::append_to(module, false_block);
        fb.exit_if();
    } else {
        let mut tb = Builder::append_to(module, true_block);
        tb.exit_if();
        let mut fb = Builder::append_to(module, false_block);
        fb.exit_loop();
    }

    let amount = module.constant(spec.amount);
    let mut b = Builder::append_to(module, continuing);
    let stepped_from = b.load(lcv_ptr);
    let stepped = b.binary(spec.step, lcv_ty, stepped_from, amount);
    b.store(lcv_ptr, stepped);
    b.next_iteration();

    CountingLoop {
        loop_inst,
        lcv,
        body_load,
        body,
    }
}

/// [`counting_loop_with`] in its most common arrangement: exit through the
/// false arm, stepping by the given amount
#[allow(dead_code)]
pub fn counting_loop(
    module: &mut Module,
    block: BlockId,
    init: ConstValue,
    cmp: BinaryOp,
    limit: ConstValue,
    step: BinaryOp,
    amount: ConstValue,
) -> CountingLoop {
    counting_loop_with(
        module,
        block,
        LoopSpec {
            init,
            cmp,
            limit,
            step,
            amount,
            exit_on_true: false,
        },
    )
}

/// Install a log subscriber for debugging test failures; honors RUST_LOG
#[allow(dead_code)]
pub fn init_logs() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// All calls to one builtin, in instruction order
#[allow(dead_code)]
pub fn calls_of(module: &Module, func: BuiltinFn) -> Vec<InstId> {
    module
        .instructions()
        .into_iter()
        .filter(|&inst| matches!(module.inst(inst).op, Op::Call(f) if f == func))
        .collect()
}

/// Total number of instructions in the module
#[allow(dead_code)]
pub fn instruction_count(module: &Module) -> usize {
    module.instructions().len()
}
