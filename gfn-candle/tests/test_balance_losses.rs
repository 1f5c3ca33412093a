use anyhow::Result;
use candle_core::Device;
use gfn_candle::{
    containers::Trajectories,
    env::{Env, HyperGrid, HyperGridConfig},
    estimator::{EstimatorRole, FunctionEstimator, LogZEstimator},
    loss::{
        DbConfig, DetailedBalance, FlowMatching, Loss, SubTbConfig, SubTrajectoryBalance,
        TbConfig, TrajectoryBalance,
    },
    mlp::NeuralNetConfig,
    model::ModuleConfig,
    parametrization::{
        AnyParametrization, DbParametrization, EstimatorSet, FmParametrization,
        SubTbParametrization, TbParametrization,
    },
    sampler::{TrajectoriesSampler, TrajectoriesSamplerConfig},
};
use gfn_core::{Scheme, Weighing};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn nn() -> ModuleConfig {
    ModuleConfig::NeuralNet(NeuralNetConfig::default().hidden_dim(32))
}

fn env() -> HyperGrid {
    HyperGrid::new(HyperGridConfig::default().ndim(2).height(4))
}

fn sample(env: &HyperGrid, pf: &FunctionEstimator, n: usize) -> Result<Trajectories> {
    let mut sampler =
        TrajectoriesSampler::build(env.clone(), pf.clone(), TrajectoriesSamplerConfig::default())?;
    sampler.sample_trajectories(n)
}

fn close(a: f32, b: f32) -> bool {
    (a - b).abs() <= 1e-4 * a.abs().max(b.abs()).max(1.0)
}

#[test]
fn test_subtb_with_tb_weighing_equals_tb() -> Result<()> {
    init();
    let device = Device::Cpu;
    let env = env();
    let pf = FunctionEstimator::new(&env, EstimatorRole::LogitPf, &nn(), &device)?;
    let pb = FunctionEstimator::new(&env, EstimatorRole::LogitPb, &nn(), &device)?;
    let log_f = FunctionEstimator::new(&env, EstimatorRole::LogStateFlow, &nn(), &device)?;
    let trajs = sample(&env, &pf, 16)?;

    // log Z is pinned to log F(s0).
    let log_f_s0 = log_f.forward(&env.reset(1)?)?.to_vec2::<f32>()?[0][0];
    let log_z = LogZEstimator::new(log_f_s0 as f64, &device)?;

    let tb = TrajectoryBalance::new(
        TbParametrization::new(pf.clone(), pb.clone(), log_z)?,
        TbConfig::default(),
    );
    let subtb = SubTrajectoryBalance::new(
        SubTbParametrization::new(pf, pb, log_f)?,
        SubTbConfig::default().weighing(Weighing::TrajectoryBalance),
    )?;

    let a = tb.loss(&trajs)?.to_scalar::<f32>()?;
    let b = subtb.loss(&trajs)?.to_scalar::<f32>()?;
    assert!(close(a, b), "TB {} != SubTB(TB) {}", a, b);
    Ok(())
}

#[test]
fn test_subtb_with_db_weighing_equals_db() -> Result<()> {
    init();
    let device = Device::Cpu;
    let env = env();
    let pf = FunctionEstimator::new(&env, EstimatorRole::LogitPf, &nn(), &device)?;
    let pb = FunctionEstimator::new(&env, EstimatorRole::LogitPb, &nn(), &device)?;
    let log_f = FunctionEstimator::new(&env, EstimatorRole::LogStateFlow, &nn(), &device)?;
    let trajs = sample(&env, &pf, 16)?;

    let p = DbParametrization::new(pf, pb, log_f)?;
    let db = DetailedBalance::new(p.clone(), DbConfig::default());
    let subtb = SubTrajectoryBalance::new(
        p.into(),
        SubTbConfig::default().weighing(Weighing::DetailedBalance),
    )?;

    let a = db.loss(&trajs.to_transitions()?)?.to_scalar::<f32>()?;
    let b = subtb.loss(&trajs)?.to_scalar::<f32>()?;
    assert!(close(a, b), "DB {} != SubTB(DB) {}", a, b);
    Ok(())
}

#[test]
fn test_on_policy_matches_recomputed_log_probs() -> Result<()> {
    init();
    let device = Device::Cpu;
    let env = env();
    let pf = FunctionEstimator::new(&env, EstimatorRole::LogitPf, &nn(), &device)?;
    let pb = FunctionEstimator::new(&env, EstimatorRole::LogitPb, &nn(), &device)?;
    let trajs = sample(&env, &pf, 8)?;

    // Sampling with temperature one and no exploration records the policy's
    // own log-probabilities.
    let p = TbParametrization::new(pf, pb, LogZEstimator::new(0.0, &device)?)?;
    let off = TrajectoryBalance::new(p.clone(), TbConfig::default());
    let on = TrajectoryBalance::new(p, TbConfig::default().on_policy(true));
    let a = off.loss(&trajs)?.to_scalar::<f32>()?;
    let b = on.loss(&trajs)?.to_scalar::<f32>()?;
    assert!(close(a, b), "{} != {}", a, b);
    Ok(())
}

#[test]
fn test_every_loss_is_a_finite_scalar() -> Result<()> {
    init();
    let device = Device::Cpu;
    let env = env();
    let pf = FunctionEstimator::new(&env, EstimatorRole::LogitPf, &nn(), &device)?;
    let set = EstimatorSet::default()
        .logit_pf(pf.clone())
        .logit_pb(FunctionEstimator::new(
            &env,
            EstimatorRole::LogitPb,
            &nn(),
            &device,
        )?)
        .log_f(FunctionEstimator::new(
            &env,
            EstimatorRole::LogStateFlow,
            &nn(),
            &device,
        )?)
        .log_z(LogZEstimator::new(0.0, &device)?)
        .log_edge_flow(FunctionEstimator::new(
            &env,
            EstimatorRole::LogEdgeFlow,
            &nn(),
            &device,
        )?);
    let trajs = sample(&env, &pf, 12)?;

    let mut values = vec![];
    let tb = TrajectoryBalance::try_from(AnyParametrization::build(
        Scheme::TrajectoryBalance,
        set.clone(),
    )?)?;
    values.push(tb.loss(&trajs)?);
    let db = DetailedBalance::try_from(AnyParametrization::build_from_name("DB", set.clone())?)?;
    values.push(db.loss(&trajs)?);
    let fm = FlowMatching::try_from((
        AnyParametrization::build(Scheme::FlowMatching, set.clone())?,
        env.clone(),
    ))?;
    values.push(fm.loss(&trajs)?);
    for weighing in Weighing::all() {
        let subtb = SubTrajectoryBalance::try_from(AnyParametrization::build(
            Scheme::SubTrajectoryBalance,
            set.clone(),
        )?)?
        .with_config(SubTbConfig::default().weighing(weighing))?;
        values.push(subtb.loss(&trajs)?);
    }

    for v in values {
        assert_eq!(v.rank(), 0);
        let v = v.to_scalar::<f32>()?;
        assert!(v.is_finite() && v >= 0.0, "{}", v);
    }
    Ok(())
}

#[test]
fn test_flow_matching_with_tabular_flows() -> Result<()> {
    init();
    let device = Device::Cpu;
    let env = env();
    let pf = FunctionEstimator::new(&env, EstimatorRole::LogitPf, &ModuleConfig::Uniform, &device)?;
    let trajs = sample(&env, &pf, 8)?;
    let log_edge_flow =
        FunctionEstimator::new(&env, EstimatorRole::LogEdgeFlow, &ModuleConfig::Tabular, &device)?;
    let fm = FlowMatching::new(
        FmParametrization::new(log_edge_flow)?,
        env.clone(),
        Default::default(),
    );
    let value = fm.loss(&trajs)?.to_scalar::<f32>()?;
    assert!(value.is_finite() && value > 0.0);
    Ok(())
}
