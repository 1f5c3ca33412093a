//! Bundles of estimators trained by one balance scheme.
//!
//! | scheme | bundle | estimators |
//! |---|---|---|
//! | FM | [`FmParametrization`] | `log_edge_flow` |
//! | DB | [`DbParametrization`] | `logit_pf`, `logit_pb`, `log_f` |
//! | TB | [`TbParametrization`] | `logit_pf`, `logit_pb`, `log_z` |
//! | SubTB | [`SubTbParametrization`] | `logit_pf`, `logit_pb`, `log_f` |
use crate::{
    containers::Trajectories,
    env::Env,
    estimator::{EstimatorRole, FunctionEstimator, LogZEstimator},
    sampler::{TrajectoriesSampler, TrajectoriesSamplerConfig},
    util::{load_vars, save_vars},
};
use anyhow::Result;
use candle_core::{Device, Var};
use gfn_core::{GfnError, Scheme};
use std::{
    collections::{BTreeMap, HashSet},
    path::Path,
};

/// Common interface of the parametrizations.
pub trait Parametrization {
    /// The balance scheme.
    fn scheme(&self) -> Scheme;

    /// The estimator defining the forward policy.
    fn forward_estimator(&self) -> &FunctionEstimator;

    /// Parameters of all estimators, named `<estimator>.<param>`, forward
    /// policy first. Shared parameters appear once per owner.
    fn named_parameters(&self) -> Result<Vec<(String, Var)>>;

    /// Learnable parameters, de-duplicated by tensor identity.
    ///
    /// A parameter shared by several estimators (e.g. a common torso) is kept
    /// under the first estimator owning it.
    fn parameters(&self) -> Result<BTreeMap<String, Var>> {
        let mut seen = HashSet::new();
        Ok(self
            .named_parameters()?
            .into_iter()
            .filter(|(_, v)| seen.insert(v.id()))
            .collect())
    }

    /// A sampler of `n_samples` on-policy rollouts.
    fn pi<E: Env>(&self, env: E, n_samples: usize) -> Result<PolicySampler<E>> {
        let sampler = TrajectoriesSampler::build(
            env,
            self.forward_estimator().clone(),
            TrajectoriesSamplerConfig::default(),
        )?;
        Ok(PolicySampler { sampler, n_samples })
    }

    /// Device of the parameters.
    fn device(&self) -> &Device {
        self.forward_estimator().device()
    }

    /// Saves all parameters into one safetensors file.
    fn save<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let vars = self.parameters()?.into_iter().collect::<Vec<_>>();
        save_vars(&vars, path)
    }

    /// Loads all parameters from a safetensors file.
    fn load<T: AsRef<Path>>(&mut self, path: T) -> Result<()> {
        let vars = self.parameters()?.into_iter().collect::<Vec<_>>();
        load_vars(&vars, path, self.device())
    }
}

/// Samples on-policy rollouts of a parametrization.
pub struct PolicySampler<E: Env> {
    sampler: TrajectoriesSampler<E>,
    n_samples: usize,
}

impl<E: Env> PolicySampler<E> {
    /// Samples `n_samples` rollouts.
    pub fn sample(&mut self) -> Result<Trajectories> {
        self.sampler.sample_trajectories(self.n_samples)
    }
}

fn prefixed(name: &str, vars: Vec<(String, Var)>) -> Vec<(String, Var)> {
    vars.into_iter()
        .map(|(k, v)| (format!("{}.{}", name, k), v))
        .collect()
}

fn pf_pb_parameters(
    logit_pf: &FunctionEstimator,
    logit_pb: &FunctionEstimator,
) -> Result<Vec<(String, Var)>> {
    let mut vars = prefixed("logit_pf", logit_pf.named_parameters()?);
    vars.extend(prefixed("logit_pb", logit_pb.named_parameters()?));
    Ok(vars)
}

/// Flow matching: edge flows only.
#[derive(Clone, Debug)]
pub struct FmParametrization {
    log_edge_flow: FunctionEstimator,
}

impl FmParametrization {
    /// Bundles an edge flow estimator.
    pub fn new(log_edge_flow: FunctionEstimator) -> Result<Self> {
        log_edge_flow.expect_role(EstimatorRole::LogEdgeFlow)?;
        Ok(Self { log_edge_flow })
    }

    /// Log edge flows.
    pub fn log_edge_flow(&self) -> &FunctionEstimator {
        &self.log_edge_flow
    }
}

impl Parametrization for FmParametrization {
    fn scheme(&self) -> Scheme {
        Scheme::FlowMatching
    }

    fn forward_estimator(&self) -> &FunctionEstimator {
        &self.log_edge_flow
    }

    fn named_parameters(&self) -> Result<Vec<(String, Var)>> {
        Ok(prefixed(
            "log_edge_flow",
            self.log_edge_flow.named_parameters()?,
        ))
    }
}

/// Detailed balance: policies and state flows.
#[derive(Clone, Debug)]
pub struct DbParametrization {
    logit_pf: FunctionEstimator,
    logit_pb: FunctionEstimator,
    log_f: FunctionEstimator,
}

impl DbParametrization {
    /// Bundles the estimators, checking their roles.
    pub fn new(
        logit_pf: FunctionEstimator,
        logit_pb: FunctionEstimator,
        log_f: FunctionEstimator,
    ) -> Result<Self> {
        logit_pf.expect_role(EstimatorRole::LogitPf)?;
        logit_pb.expect_role(EstimatorRole::LogitPb)?;
        log_f.expect_role(EstimatorRole::LogStateFlow)?;
        Ok(Self {
            logit_pf,
            logit_pb,
            log_f,
        })
    }

    /// Forward policy logits.
    pub fn logit_pf(&self) -> &FunctionEstimator {
        &self.logit_pf
    }

    /// Backward policy logits.
    pub fn logit_pb(&self) -> &FunctionEstimator {
        &self.logit_pb
    }

    /// Log state flows.
    pub fn log_f(&self) -> &FunctionEstimator {
        &self.log_f
    }
}

impl Parametrization for DbParametrization {
    fn scheme(&self) -> Scheme {
        Scheme::DetailedBalance
    }

    fn forward_estimator(&self) -> &FunctionEstimator {
        &self.logit_pf
    }

    fn named_parameters(&self) -> Result<Vec<(String, Var)>> {
        let mut vars = pf_pb_parameters(&self.logit_pf, &self.logit_pb)?;
        vars.extend(prefixed("log_f", self.log_f.named_parameters()?));
        Ok(vars)
    }
}

/// Trajectory balance: policies and the log-partition scalar.
#[derive(Clone)]
pub struct TbParametrization {
    logit_pf: FunctionEstimator,
    logit_pb: FunctionEstimator,
    log_z: LogZEstimator,
}

impl TbParametrization {
    /// Bundles the estimators, checking their roles.
    pub fn new(
        logit_pf: FunctionEstimator,
        logit_pb: FunctionEstimator,
        log_z: LogZEstimator,
    ) -> Result<Self> {
        logit_pf.expect_role(EstimatorRole::LogitPf)?;
        logit_pb.expect_role(EstimatorRole::LogitPb)?;
        Ok(Self {
            logit_pf,
            logit_pb,
            log_z,
        })
    }

    /// Forward policy logits.
    pub fn logit_pf(&self) -> &FunctionEstimator {
        &self.logit_pf
    }

    /// Backward policy logits.
    pub fn logit_pb(&self) -> &FunctionEstimator {
        &self.logit_pb
    }

    /// Log-partition estimator.
    pub fn log_z(&self) -> &LogZEstimator {
        &self.log_z
    }
}

impl Parametrization for TbParametrization {
    fn scheme(&self) -> Scheme {
        Scheme::TrajectoryBalance
    }

    fn forward_estimator(&self) -> &FunctionEstimator {
        &self.logit_pf
    }

    fn named_parameters(&self) -> Result<Vec<(String, Var)>> {
        let mut vars = pf_pb_parameters(&self.logit_pf, &self.logit_pb)?;
        vars.extend(self.log_z.named_parameters()?);
        Ok(vars)
    }
}

/// Sub-trajectory balance: the same estimators as detailed balance.
#[derive(Clone, Debug)]
pub struct SubTbParametrization {
    logit_pf: FunctionEstimator,
    logit_pb: FunctionEstimator,
    log_f: FunctionEstimator,
}

impl SubTbParametrization {
    /// Bundles the estimators, checking their roles.
    pub fn new(
        logit_pf: FunctionEstimator,
        logit_pb: FunctionEstimator,
        log_f: FunctionEstimator,
    ) -> Result<Self> {
        let db = DbParametrization::new(logit_pf, logit_pb, log_f)?;
        Ok(db.into())
    }

    /// Forward policy logits.
    pub fn logit_pf(&self) -> &FunctionEstimator {
        &self.logit_pf
    }

    /// Backward policy logits.
    pub fn logit_pb(&self) -> &FunctionEstimator {
        &self.logit_pb
    }

    /// Log state flows.
    pub fn log_f(&self) -> &FunctionEstimator {
        &self.log_f
    }
}

impl From<DbParametrization> for SubTbParametrization {
    fn from(p: DbParametrization) -> Self {
        Self {
            logit_pf: p.logit_pf,
            logit_pb: p.logit_pb,
            log_f: p.log_f,
        }
    }
}

impl From<SubTbParametrization> for DbParametrization {
    fn from(p: SubTbParametrization) -> Self {
        Self {
            logit_pf: p.logit_pf,
            logit_pb: p.logit_pb,
            log_f: p.log_f,
        }
    }
}

impl Parametrization for SubTbParametrization {
    fn scheme(&self) -> Scheme {
        Scheme::SubTrajectoryBalance
    }

    fn forward_estimator(&self) -> &FunctionEstimator {
        &self.logit_pf
    }

    fn named_parameters(&self) -> Result<Vec<(String, Var)>> {
        let mut vars = pf_pb_parameters(&self.logit_pf, &self.logit_pb)?;
        vars.extend(prefixed("log_f", self.log_f.named_parameters()?));
        Ok(vars)
    }
}

/// Estimators from which a parametrization is assembled by scheme.
#[derive(Clone, Default)]
pub struct EstimatorSet {
    /// Forward policy logits.
    pub logit_pf: Option<FunctionEstimator>,

    /// Backward policy logits.
    pub logit_pb: Option<FunctionEstimator>,

    /// Log state flows.
    pub log_f: Option<FunctionEstimator>,

    /// Log-partition scalar.
    pub log_z: Option<LogZEstimator>,

    /// Log edge flows.
    pub log_edge_flow: Option<FunctionEstimator>,
}

impl EstimatorSet {
    /// Sets the forward policy.
    pub fn logit_pf(mut self, v: FunctionEstimator) -> Self {
        self.logit_pf = Some(v);
        self
    }

    /// Sets the backward policy.
    pub fn logit_pb(mut self, v: FunctionEstimator) -> Self {
        self.logit_pb = Some(v);
        self
    }

    /// Sets the state flow.
    pub fn log_f(mut self, v: FunctionEstimator) -> Self {
        self.log_f = Some(v);
        self
    }

    /// Sets the log-partition scalar.
    pub fn log_z(mut self, v: LogZEstimator) -> Self {
        self.log_z = Some(v);
        self
    }

    /// Sets the edge flow.
    pub fn log_edge_flow(mut self, v: FunctionEstimator) -> Self {
        self.log_edge_flow = Some(v);
        self
    }
}

fn required<T>(v: Option<T>, scheme: Scheme, role: &str) -> Result<T> {
    v.ok_or_else(|| {
        GfnError::MissingEstimator {
            scheme: scheme.to_string(),
            role: role.to_string(),
        }
        .into()
    })
}

/// Any of the four parametrizations.
#[derive(Clone)]
pub enum AnyParametrization {
    /// Flow matching.
    Fm(FmParametrization),

    /// Detailed balance.
    Db(DbParametrization),

    /// Trajectory balance.
    Tb(TbParametrization),

    /// Sub-trajectory balance.
    SubTb(SubTbParametrization),
}

impl AnyParametrization {
    /// Assembles the parametrization of `scheme` from a set of estimators.
    ///
    /// # Errors
    ///
    /// [`GfnError::MissingEstimator`] if an estimator the scheme needs is
    /// absent, [`GfnError::EstimatorRoleMismatch`] if one has the wrong role.
    pub fn build(scheme: Scheme, set: EstimatorSet) -> Result<Self> {
        let p = match scheme {
            Scheme::FlowMatching => Self::Fm(FmParametrization::new(required(
                set.log_edge_flow,
                scheme,
                "log_edge_flow",
            )?)?),
            Scheme::DetailedBalance => Self::Db(DbParametrization::new(
                required(set.logit_pf, scheme, "logit_pf")?,
                required(set.logit_pb, scheme, "logit_pb")?,
                required(set.log_f, scheme, "log_f")?,
            )?),
            Scheme::TrajectoryBalance => Self::Tb(TbParametrization::new(
                required(set.logit_pf, scheme, "logit_pf")?,
                required(set.logit_pb, scheme, "logit_pb")?,
                required(set.log_z, scheme, "log_z")?,
            )?),
            Scheme::SubTrajectoryBalance => Self::SubTb(SubTbParametrization::new(
                required(set.logit_pf, scheme, "logit_pf")?,
                required(set.logit_pb, scheme, "logit_pb")?,
                required(set.log_f, scheme, "log_f")?,
            )?),
        };
        Ok(p)
    }

    /// Same as [`AnyParametrization::build`] with the scheme given by name,
    /// e.g. `"SubTB"`.
    pub fn build_from_name(scheme: &str, set: EstimatorSet) -> Result<Self> {
        Self::build(scheme.parse::<Scheme>()?, set)
    }
}

impl Parametrization for AnyParametrization {
    fn scheme(&self) -> Scheme {
        match self {
            Self::Fm(p) => p.scheme(),
            Self::Db(p) => p.scheme(),
            Self::Tb(p) => p.scheme(),
            Self::SubTb(p) => p.scheme(),
        }
    }

    fn forward_estimator(&self) -> &FunctionEstimator {
        match self {
            Self::Fm(p) => p.forward_estimator(),
            Self::Db(p) => p.forward_estimator(),
            Self::Tb(p) => p.forward_estimator(),
            Self::SubTb(p) => p.forward_estimator(),
        }
    }

    fn named_parameters(&self) -> Result<Vec<(String, Var)>> {
        match self {
            Self::Fm(p) => p.named_parameters(),
            Self::Db(p) => p.named_parameters(),
            Self::Tb(p) => p.named_parameters(),
            Self::SubTb(p) => p.named_parameters(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        env::{HyperGrid, HyperGridConfig},
        mlp::NeuralNetConfig,
        model::ModuleConfig,
    };
    use tempdir::TempDir;

    fn nn() -> ModuleConfig {
        ModuleConfig::NeuralNet(NeuralNetConfig::default().hidden_dim(16))
    }

    fn estimator(env: &HyperGrid, role: EstimatorRole) -> Result<FunctionEstimator> {
        FunctionEstimator::new(env, role, &nn(), &Device::Cpu)
    }

    #[test]
    fn test_shared_torso_is_deduplicated() -> Result<()> {
        let env = HyperGrid::new(HyperGridConfig::default());
        let pf = estimator(&env, EstimatorRole::LogitPf)?;
        let pb = FunctionEstimator::with_torso(
            &env,
            EstimatorRole::LogitPb,
            pf.torso().unwrap(),
            &Device::Cpu,
        )?;
        let log_f = estimator(&env, EstimatorRole::LogStateFlow)?;
        let p = DbParametrization::new(pf, pb, log_f)?;

        assert_eq!(p.named_parameters()?.len(), 18);
        let params = p.parameters()?;
        assert_eq!(params.len(), 14);
        assert!(params.contains_key("logit_pf.torso.ln0.weight"));
        assert!(!params.contains_key("logit_pb.torso.ln0.weight"));
        assert!(params.contains_key("logit_pb.head.weight"));
        assert!(params.contains_key("log_f.torso.ln1.bias"));
        Ok(())
    }

    #[test]
    fn test_build_by_scheme() -> Result<()> {
        let env = HyperGrid::new(HyperGridConfig::default());
        let set = EstimatorSet::default()
            .logit_pf(estimator(&env, EstimatorRole::LogitPf)?)
            .logit_pb(estimator(&env, EstimatorRole::LogitPb)?)
            .log_z(LogZEstimator::new(0.0, &Device::Cpu)?);

        let p = AnyParametrization::build_from_name("TB", set.clone())?;
        assert_eq!(p.scheme(), Scheme::TrajectoryBalance);
        assert!(p.parameters()?.contains_key("log_z"));

        let err = AnyParametrization::build(Scheme::DetailedBalance, set.clone())
            .err()
            .unwrap();
        assert_eq!(
            err.downcast_ref::<GfnError>(),
            Some(&GfnError::MissingEstimator {
                scheme: "DB".into(),
                role: "log_f".into()
            })
        );

        let err = AnyParametrization::build_from_name("XB", set).err().unwrap();
        assert_eq!(
            err.downcast_ref::<GfnError>(),
            Some(&GfnError::UnknownScheme("XB".into()))
        );
        Ok(())
    }

    #[test]
    fn test_roles_are_checked() -> Result<()> {
        let env = HyperGrid::new(HyperGridConfig::default());
        let pf = estimator(&env, EstimatorRole::LogitPf)?;
        let log_f = estimator(&env, EstimatorRole::LogStateFlow)?;
        assert!(DbParametrization::new(pf.clone(), pf.clone(), log_f).is_err());
        assert!(FmParametrization::new(pf).is_err());
        Ok(())
    }

    #[test]
    fn test_pi_and_save_load() -> Result<()> {
        let env = HyperGrid::new(HyperGridConfig::default());
        let p = SubTbParametrization::new(
            estimator(&env, EstimatorRole::LogitPf)?,
            estimator(&env, EstimatorRole::LogitPb)?,
            estimator(&env, EstimatorRole::LogStateFlow)?,
        )?;
        let trajs = p.pi(env.clone(), 7)?.sample()?;
        assert_eq!(trajs.n_trajectories(), 7);

        let dir = TempDir::new("parametrization")?;
        let path = dir.path().join("subtb.safetensors");
        p.save(&path)?;

        let mut q = SubTbParametrization::new(
            estimator(&env, EstimatorRole::LogitPf)?,
            estimator(&env, EstimatorRole::LogitPb)?,
            estimator(&env, EstimatorRole::LogStateFlow)?,
        )?;
        q.load(&path)?;
        let states = env.all_states()?;
        let diff = (p.log_f().forward(&states)? - q.log_f().forward(&states)?)?
            .abs()?
            .sum_all()?
            .to_scalar::<f32>()?;
        assert!(diff < 1e-6);
        Ok(())
    }
}
