//! Regressor artifacts and the feature-name resolution chain.

use serde::Deserialize;
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
};

use crate::features::FeatureRow;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model file not found at {}; train and export a model first", .0.display())]
    NotFound(PathBuf),
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid model artifact: {0}")]
    Invalid(String),
    #[error("no feature manifest and the model records no input names")]
    NoFeatureNames,
    #[error("feature mismatch: missing {missing:?}, unexpected {unexpected:?}")]
    FeatureMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
    #[error("{} needs the `torch` feature", .0.display())]
    Unsupported(PathBuf),
    #[error("torchscript: {0}")]
    Torch(String),
}

/// A trained model treated as a pure function of one feature row.
pub trait Regressor: Send + Sync {
    fn predict(&self, row: &FeatureRow) -> Result<f64, ModelError>;

    /// Input names recorded at training time, if the artifact kept them.
    fn feature_names(&self) -> Option<Vec<String>>;
}

fn check_composition(row: &FeatureRow, expected: &[String]) -> Result<(), ModelError> {
    let got: BTreeSet<&str> = row.names().collect();
    let want: BTreeSet<&str> = expected.iter().map(String::as_str).collect();
    if got == want {
        return Ok(());
    }
    Err(ModelError::FeatureMismatch {
        missing: want.difference(&got).map(|s| s.to_string()).collect(),
        unexpected: got.difference(&want).map(|s| s.to_string()).collect(),
    })
}

// ---------- JSON artifacts ----------

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Artifact {
    Forest(Forest),
    Linear(Linear),
}

/// One regression tree in sklearn's flat layout. `-1` children mark a leaf.
#[derive(Deserialize, Debug, Clone)]
pub struct Tree {
    pub children_left: Vec<i64>,
    pub children_right: Vec<i64>,
    pub feature: Vec<i64>,
    pub threshold: Vec<f64>,
    pub value: Vec<f64>,
}

impl Tree {
    fn validate(&self, n_features: usize) -> Result<(), ModelError> {
        let n = self.children_left.len();
        if n == 0 {
            return Err(ModelError::Invalid("empty tree".into()));
        }
        if [
            self.children_right.len(),
            self.feature.len(),
            self.threshold.len(),
            self.value.len(),
        ]
        .iter()
        .any(|&l| l != n)
        {
            return Err(ModelError::Invalid("tree arrays differ in length".into()));
        }
        for i in 0..n {
            let (l, r) = (self.children_left[i], self.children_right[i]);
            if l == -1 && r == -1 {
                continue;
            }
            // children always come after their parent in sklearn's layout
            let in_range = |c: i64| c > i as i64 && (c as usize) < n;
            if !in_range(l) || !in_range(r) {
                return Err(ModelError::Invalid(format!("node {} has bad children", i)));
            }
            let f = self.feature[i];
            if f < 0 || f as usize >= n_features {
                return Err(ModelError::Invalid(format!(
                    "node {} splits on feature {} of {}",
                    i, f, n_features
                )));
            }
        }
        Ok(())
    }

    fn predict(&self, x: &[f64]) -> f64 {
        let mut node = 0usize;
        while self.children_left[node] != -1 {
            let f = self.feature[node] as usize;
            node = if x[f] <= self.threshold[node] {
                self.children_left[node] as usize
            } else {
                self.children_right[node] as usize
            };
        }
        self.value[node]
    }
}

/// Averaging tree ensemble (random forest regressor).
#[derive(Deserialize, Debug, Clone)]
pub struct Forest {
    #[serde(default)]
    pub feature_names_in: Option<Vec<String>>,
    #[serde(default)]
    pub n_features_in: Option<usize>,
    pub trees: Vec<Tree>,
}

impl Forest {
    fn n_features(&self) -> usize {
        match (&self.feature_names_in, self.n_features_in) {
            (Some(names), _) => names.len(),
            (None, Some(n)) => n,
            (None, None) => self
                .trees
                .iter()
                .flat_map(|t| t.feature.iter())
                .map(|&f| (f + 1).max(0) as usize)
                .max()
                .unwrap_or(0),
        }
    }

    fn validate(&self) -> Result<(), ModelError> {
        if self.trees.is_empty() {
            return Err(ModelError::Invalid("forest has no trees".into()));
        }
        let n = self.n_features();
        for t in &self.trees {
            t.validate(n)?;
        }
        Ok(())
    }
}

impl Regressor for Forest {
    fn predict(&self, row: &FeatureRow) -> Result<f64, ModelError> {
        let x = match &self.feature_names_in {
            Some(names) => {
                check_composition(row, names)?;
                row.ordered(names)
            }
            None => {
                let n = self.n_features();
                if row.len() != n {
                    return Err(ModelError::Invalid(format!(
                        "forest expects {} inputs, got {}",
                        n,
                        row.len()
                    )));
                }
                row.values()
            }
        };
        let sum: f64 = self.trees.iter().map(|t| t.predict(&x)).sum();
        Ok(sum / self.trees.len() as f64)
    }

    fn feature_names(&self) -> Option<Vec<String>> {
        self.feature_names_in.clone()
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct Linear {
    pub intercept: f64,
    pub coefficients: BTreeMap<String, f64>,
}

impl Regressor for Linear {
    fn predict(&self, row: &FeatureRow) -> Result<f64, ModelError> {
        let names: Vec<String> = self.coefficients.keys().cloned().collect();
        check_composition(row, &names)?;
        Ok(self.intercept
            + self
                .coefficients
                .iter()
                .map(|(k, w)| w * row.get(k).unwrap_or(0.0))
                .sum::<f64>())
    }

    fn feature_names(&self) -> Option<Vec<String>> {
        Some(self.coefficients.keys().cloned().collect())
    }
}

fn load_json(path: &Path) -> Result<Box<dyn Regressor>, ModelError> {
    let txt = fs::read_to_string(path).map_err(|source| ModelError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let art: Artifact = serde_json::from_str(&txt).map_err(|source| ModelError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let model: Box<dyn Regressor> = match art {
        Artifact::Forest(f) => {
            f.validate()?;
            tracing::info!("loaded forest with {} trees", f.trees.len());
            Box::new(f)
        }
        Artifact::Linear(l) => {
            tracing::info!("loaded linear model over {} features", l.coefficients.len());
            Box::new(l)
        }
    };
    Ok(model)
}

// ---------- TorchScript ----------

#[cfg(feature = "torch")]
pub mod torch {
    use super::{check_composition, ModelError, Regressor};
    use crate::features::FeatureRow;
    use parking_lot::Mutex;
    use std::path::Path;
    use tch::{CModule, Device, IValue, Tensor};

    /// TorchScript regressor mapping `[1, n]` float inputs to one scalar.
    pub struct TorchRegressor {
        module: Mutex<CModule>,
        device: Device,
        names: Option<Vec<String>>,
    }

    impl TorchRegressor {
        pub fn load(path: &Path) -> Result<Self, ModelError> {
            let device = Device::Cpu;
            let module = CModule::load_on_device(path, device)
                .map_err(|e| ModelError::Torch(e.to_string()))?;
            let names = introspect_names(&module);
            Ok(Self {
                module: Mutex::new(module),
                device,
                names,
            })
        }
    }

    // Exported modules may carry a `feature_names() -> List[str]` method.
    fn introspect_names(module: &CModule) -> Option<Vec<String>> {
        let no_args: &[IValue] = &[];
        match module.method_is("feature_names", no_args) {
            Ok(IValue::GenericList(items)) => items
                .into_iter()
                .map(|v| match v {
                    IValue::String(s) => Some(s),
                    _ => None,
                })
                .collect(),
            Ok(other) => {
                tracing::debug!("feature_names() returned {:?}", other);
                None
            }
            Err(e) => {
                tracing::debug!("module has no feature_names(): {}", e);
                None
            }
        }
    }

    impl Regressor for TorchRegressor {
        fn predict(&self, row: &FeatureRow) -> Result<f64, ModelError> {
            if let Some(names) = &self.names {
                check_composition(row, names)?;
            }
            let x: Vec<f32> = match &self.names {
                Some(names) => row.ordered(names),
                None => row.values(),
            }
            .into_iter()
            .map(|v| v as f32)
            .collect();
            let input = Tensor::from_slice(&x)
                .reshape([1, x.len() as i64])
                .to_device(self.device);
            let out = self
                .module
                .lock()
                .forward_ts(&[input])
                .map_err(|e| ModelError::Torch(e.to_string()))?
                .reshape([-1]);
            if out.numel() != 1 {
                return Err(ModelError::Invalid(format!(
                    "expected a scalar output, got shape {:?}",
                    out.size()
                )));
            }
            Ok(out.double_value(&[0]))
        }

        fn feature_names(&self) -> Option<Vec<String>> {
            self.names.clone()
        }
    }
}

/// Load a regressor artifact. A missing file is the one unrecoverable precondition.
pub fn load_model(path: &Path) -> Result<Box<dyn Regressor>, ModelError> {
    if !path.exists() {
        return Err(ModelError::NotFound(path.to_path_buf()));
    }
    match path.extension().and_then(|e| e.to_str()) {
        #[cfg(feature = "torch")]
        Some("pt") => Ok(Box::new(torch::TorchRegressor::load(path)?)),
        #[cfg(not(feature = "torch"))]
        Some("pt") => Err(ModelError::Unsupported(path.to_path_buf())),
        _ => load_json(path),
    }
}

/// Read a JSON array of feature names.
pub fn read_manifest(path: &Path) -> Result<Vec<String>, ModelError> {
    let txt = fs::read_to_string(path).map_err(|source| ModelError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let names: Vec<String> = serde_json::from_str(&txt).map_err(|source| ModelError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    if names.is_empty() {
        return Err(ModelError::Invalid(format!("{} lists no features", path.display())));
    }
    Ok(names)
}

/// Manifest first, then the model's own record, else fail.
pub fn resolve_feature_names(
    manifest: &Path,
    model: &dyn Regressor,
) -> Result<Vec<String>, ModelError> {
    match read_manifest(manifest) {
        Ok(names) => {
            if let Some(recorded) = model.feature_names() {
                let a: BTreeSet<_> = names.iter().collect();
                let b: BTreeSet<_> = recorded.iter().collect();
                if a != b {
                    tracing::warn!(
                        "manifest lists {} features but the model recorded {}; inference will reject rows",
                        names.len(),
                        recorded.len()
                    );
                }
            }
            return Ok(names);
        }
        Err(e) => tracing::warn!("feature manifest unusable ({}); introspecting model", e),
    }
    match model.feature_names() {
        Some(names) if !names.is_empty() => Ok(names),
        _ => Err(ModelError::NoFeatureNames),
    }
}

/// A regressor together with the feature names rows are sampled for.
pub struct LoadedModel {
    regressor: Box<dyn Regressor>,
    feature_names: Vec<String>,
}

impl LoadedModel {
    pub fn new(regressor: Box<dyn Regressor>, feature_names: Vec<String>) -> Self {
        Self {
            regressor,
            feature_names,
        }
    }

    pub fn load(model_path: &Path, manifest_path: &Path) -> Result<Self, ModelError> {
        let regressor = load_model(model_path)?;
        let feature_names = resolve_feature_names(manifest_path, regressor.as_ref())?;
        Ok(Self::new(regressor, feature_names))
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn predict(&self, row: &FeatureRow) -> Result<f64, ModelError> {
        self.regressor.predict(row)
    }

    /// One all-zero inference, to surface shape problems before serving.
    pub fn warmup(&self) -> Result<f64, ModelError> {
        let row = FeatureRow::new(self.feature_names.iter().map(|n| (n.clone(), 0.0)).collect());
        self.predict(&row)
    }
}
