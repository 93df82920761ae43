//! Random sampling inside declared parameter bounds. Stands in for the
//! hosted optimizer when running against [`crate::memory::MemoryStore`].

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tl_types::{Assignment, ParamType, ParamValue, ParameterSpec, Scale};

/// Independent uniform (or log-uniform) sampling per parameter.
#[derive(Debug, Clone)]
pub struct RandomSampler {
    rng: StdRng,
}

impl RandomSampler {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn sample_scalar(&mut self, spec: &ParameterSpec) -> f64 {
        let raw = match spec.scale {
            Scale::Linear => self.rng.random_range(spec.min..=spec.max),
            Scale::Log => {
                let log_low = spec.min.ln();
                let log_high = spec.max.ln();
                let log_val: f64 = self.rng.random_range(log_low..=log_high);
                log_val.exp().clamp(spec.min, spec.max)
            }
        };
        match spec.kind {
            ParamType::Float => raw,
            ParamType::Integer => raw.round().clamp(spec.min, spec.max),
        }
    }

    pub fn sample(&mut self, spec: &ParameterSpec) -> ParamValue {
        if spec.size > 1 {
            return ParamValue::Vector((0..spec.size).map(|_| self.sample_scalar(spec)).collect());
        }
        let v = self.sample_scalar(spec);
        match spec.kind {
            ParamType::Float => ParamValue::Float(v),
            ParamType::Integer => ParamValue::Int(v as i64),
        }
    }

    pub fn sample_all(&mut self, specs: &[ParameterSpec]) -> Assignment {
        specs
            .iter()
            .map(|spec| (spec.name.clone(), self.sample(spec)))
            .collect()
    }
}

impl Default for RandomSampler {
    fn default() -> Self {
        Self::new()
    }
}
