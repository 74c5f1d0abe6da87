//! Rotary positional embeddings.
//!
//! Positions are injected by rotating adjacent channel pairs of the query and
//! key vectors: pair `(2i, 2i+1)` at position `p` is rotated by the angle
//! `p * theta^(-2i / head_dim)` with base `theta = 10000`. The rotation is a
//! pure function of the absolute position, so relative offsets surface as
//! phase differences in the attention scores.
//!
//! Sine/cosine tables are f32 tensors shaped `[seq_len, head_dim / 2]` and are
//! cached per `(seq_len, head_dim, theta, device)` behind a bounded LRU so
//! repeated forward passes do not rebuild them.

use candle_core::{bail, DType, Device, DeviceLocation, Result, Tensor};
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

const SIN_COS_CACHE_CAPACITY: usize = 16;

struct SinCosCache {
    capacity: usize,
    order: Vec<String>,
    entries: HashMap<String, (Tensor, Tensor)>,
}

impl SinCosCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: Vec::with_capacity(capacity),
            entries: HashMap::with_capacity(capacity),
        }
    }

    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if pos + 1 == self.order.len() {
                return;
            }
            let key_owned = self.order.remove(pos);
            self.order.push(key_owned);
        }
    }

    fn get(&mut self, key: &str) -> Option<(Tensor, Tensor)> {
        let (sin, cos) = self.entries.get(key)?;
        let pair = (sin.clone(), cos.clone());
        self.touch(key);
        Some(pair)
    }

    fn insert(&mut self, key: String, value: (Tensor, Tensor)) {
        if self.entries.contains_key(&key) {
            self.entries.insert(key.clone(), value);
            self.touch(&key);
            return;
        }
        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.order.first().cloned() {
                self.order.remove(0);
                self.entries.remove(&oldest);
            }
        }
        self.order.push(key.clone());
        self.entries.insert(key, value);
    }
}

fn global_sin_cos_cache() -> &'static Mutex<SinCosCache> {
    static CACHE: OnceLock<Mutex<SinCosCache>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(SinCosCache::new(SIN_COS_CACHE_CAPACITY)))
}

/// Configuration for building rotary positional embeddings.
#[derive(Debug, Clone, PartialEq)]
pub struct RopeConfig {
    /// Per-head dimensionality of the representations being rotated. Must be
    /// even so channels pair up.
    pub head_dim: usize,
    /// Base angle parameter controlling the frequency spectrum.
    pub theta: f32,
}

impl RopeConfig {
    /// Creates a configuration with the standard base of 10000.
    pub fn new(head_dim: usize) -> Self {
        Self {
            head_dim,
            theta: 10_000.0,
        }
    }
}

fn cache_key(seq_len: usize, cfg: &RopeConfig, device: &Device) -> String {
    let device_id = match device.location() {
        DeviceLocation::Cpu => "cpu".to_owned(),
        DeviceLocation::Cuda { gpu_id } => format!("cuda{gpu_id}"),
        DeviceLocation::Metal { gpu_id } => format!("metal{gpu_id}"),
    };
    format!(
        "seq={};dim={};theta={:.6};dev={}",
        seq_len, cfg.head_dim, cfg.theta, device_id
    )
}

/// Retrieve (or lazily build) the sine/cosine tables for the first `seq_len`
/// positions, shaped `[seq_len, head_dim / 2]` in f32.
pub fn get_sin_cos(seq_len: usize, cfg: &RopeConfig, device: &Device) -> Result<(Tensor, Tensor)> {
    if seq_len == 0 {
        bail!("rope tables require seq_len > 0");
    }
    if cfg.head_dim < 2 || cfg.head_dim % 2 != 0 {
        bail!(
            "rope requires an even head_dim >= 2, got {}",
            cfg.head_dim
        );
    }

    let key = cache_key(seq_len, cfg, device);
    let cache = global_sin_cos_cache();
    {
        let mut guard = cache
            .lock()
            .map_err(|_| candle_core::Error::Msg("rope sin/cos cache lock poisoned".into()))?;
        if let Some(pair) = guard.get(&key) {
            log::debug!("rope sin/cos cache hit: {key}");
            return Ok(pair);
        }
        log::debug!("rope sin/cos cache miss: {key}");
    }

    let half_dim = cfg.head_dim / 2;
    let base = cfg.theta as f64;
    let mut inv_freqs = Vec::with_capacity(half_dim);
    for idx in 0..half_dim {
        let exponent = (2 * idx) as f64 / cfg.head_dim as f64;
        inv_freqs.push(base.powf(-exponent));
    }

    let mut sin_data = Vec::with_capacity(seq_len * half_dim);
    let mut cos_data = Vec::with_capacity(seq_len * half_dim);
    for pos in 0..seq_len {
        let pos_f = pos as f64;
        for &inv_freq in &inv_freqs {
            let angle = pos_f * inv_freq;
            sin_data.push(angle.sin() as f32);
            cos_data.push(angle.cos() as f32);
        }
    }

    let sin = Tensor::from_vec(sin_data, (seq_len, half_dim), device)?;
    let cos = Tensor::from_vec(cos_data, (seq_len, half_dim), device)?;

    let mut guard = cache
        .lock()
        .map_err(|_| candle_core::Error::Msg("rope sin/cos cache lock poisoned".into()))?;
    if let Some(pair) = guard.get(&key) {
        return Ok(pair);
    }
    guard.insert(key, (sin.clone(), cos.clone()));
    Ok((sin, cos))
}

/// Apply rotary embeddings to query/key tensors.
///
/// * `q` and `k` must be contiguous, shaped `[batch, n_heads, seq_len,
///   head_dim]`, and share shape and dtype.
/// * `pos_start` is the absolute position of the first sequence element.
/// * The sin/cos tables stay in f32; outputs mirror the input dtype.
pub fn apply_rope_to_qk(
    q: &Tensor,
    k: &Tensor,
    pos_start: usize,
    sin: &Tensor,
    cos: &Tensor,
) -> Result<(Tensor, Tensor)> {
    let (batch, heads, seq_len, head_dim) = q.dims4()?;
    if k.dims4()? != (batch, heads, seq_len, head_dim) {
        bail!(
            "q/k shape mismatch: q={:?} k={:?}",
            q.dims(),
            k.dims()
        );
    }
    if !q.is_contiguous() || !k.is_contiguous() {
        bail!("rope inputs must be contiguous");
    }
    if head_dim % 2 != 0 {
        bail!("head_dim must be even to pair channels, got {head_dim}");
    }

    let half_dim = head_dim / 2;
    let (sin_rows, sin_dim) = sin.dims2()?;
    let (cos_rows, cos_dim) = cos.dims2()?;
    if sin_dim != half_dim || cos_dim != half_dim {
        bail!("sin/cos tables expect {half_dim} columns, got {sin_dim}/{cos_dim}");
    }
    if sin_rows < pos_start + seq_len || cos_rows < pos_start + seq_len {
        bail!(
            "sin/cos tables cover {sin_rows} positions, need {}",
            pos_start + seq_len
        );
    }

    let sin_b = sin
        .narrow(0, pos_start, seq_len)?
        .reshape((1, 1, seq_len, half_dim))?
        .broadcast_as((batch, heads, seq_len, half_dim))?;
    let cos_b = cos
        .narrow(0, pos_start, seq_len)?
        .reshape((1, 1, seq_len, half_dim))?
        .broadcast_as((batch, heads, seq_len, half_dim))?;

    let rotate = |tensor: &Tensor| -> Result<Tensor> {
        let dtype = tensor.dtype();
        let pairs = tensor
            .to_dtype(DType::F32)?
            .reshape((batch, heads, seq_len, half_dim, 2))?;
        let chunks = pairs.chunk(2, 4)?;
        let even = chunks[0].squeeze(4)?;
        let odd = chunks[1].squeeze(4)?;

        let rotated_even = even.mul(&cos_b)?.sub(&odd.mul(&sin_b)?)?;
        let rotated_odd = odd.mul(&cos_b)?.add(&even.mul(&sin_b)?)?;

        Tensor::cat(
            &[&rotated_even.unsqueeze(4)?, &rotated_odd.unsqueeze(4)?],
            4,
        )?
        .reshape((batch, heads, seq_len, head_dim))?
        .to_dtype(dtype)
    };

    Ok((rotate(q)?, rotate(k)?))
}

/// Rotary positional embedding helper bundling config and table lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct Rope {
    config: RopeConfig,
}

impl Rope {
    /// Construct the rotary embedding helper from a configuration.
    pub fn new(config: RopeConfig) -> Result<Self> {
        if config.head_dim == 0 || config.head_dim % 2 != 0 {
            bail!(
                "rope requires an even, non-zero head_dim, got {}",
                config.head_dim
            );
        }
        Ok(Self { config })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RopeConfig {
        &self.config
    }

    /// Apply rotary positional embeddings to query/key tensors whose first
    /// sequence element sits at absolute position `pos_start`.
    pub fn apply(&self, query: &Tensor, key: &Tensor, pos_start: usize) -> Result<(Tensor, Tensor)> {
        if !query.device().same_device(key.device()) {
            bail!("query and key must live on the same device");
        }
        let (_b, _h, seq_len, head_dim) = query.dims4()?;
        if head_dim != self.config.head_dim {
            bail!(
                "rope configured for head_dim {} but received {head_dim}",
                self.config.head_dim
            );
        }
        let (sin, cos) = get_sin_cos(pos_start + seq_len, &self.config, query.device())?;
        apply_rope_to_qk(query, key, pos_start, &sin, &cos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, Tensor, D};

    fn sample_qk(device: &Device) -> Result<(Tensor, Tensor)> {
        let data: Vec<f32> = (0..32).map(|i| (i as f32) * 0.1 - 1.0).collect();
        let q = Tensor::from_vec(data.clone(), (1, 2, 4, 4), device)?;
        let k = Tensor::from_vec(data, (1, 2, 4, 4), device)?;
        Ok((q, k))
    }

    #[test]
    fn position_zero_is_the_identity() -> Result<()> {
        let device = Device::Cpu;
        let rope = Rope::new(RopeConfig::new(4))?;
        let data: Vec<f32> = (0..8).map(|i| (i as f32) * 0.5 - 1.5).collect();
        let q = Tensor::from_vec(data.clone(), (1, 2, 1, 4), &device)?;
        let k = Tensor::from_vec(data, (1, 2, 1, 4), &device)?;

        let (q_rot, k_rot) = rope.apply(&q, &k, 0)?;
        let diff_q = q_rot.sub(&q)?.abs()?.max_all()?.to_vec0::<f32>()?;
        let diff_k = k_rot.sub(&k)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert!(diff_q < 1e-6 && diff_k < 1e-6);
        Ok(())
    }

    #[test]
    fn rotation_preserves_vector_magnitude() -> Result<()> {
        let device = Device::Cpu;
        let rope = Rope::new(RopeConfig::new(4))?;
        let (q, k) = sample_qk(&device)?;
        let (q_rot, _) = rope.apply(&q, &k, 0)?;

        let before = q.sqr()?.sum_keepdim(D::Minus1)?.flatten_all()?.to_vec1::<f32>()?;
        let after = q_rot
            .sqr()?
            .sum_keepdim(D::Minus1)?
            .flatten_all()?
            .to_vec1::<f32>()?;
        for (b, a) in before.iter().zip(after.iter()) {
            assert!((b - a).abs() < 1e-4, "norm changed: {b} vs {a}");
        }
        Ok(())
    }

    #[test]
    fn matches_scalar_rotation_at_position_one() -> Result<()> {
        let device = Device::Cpu;
        let head_dim = 4;
        let rope = Rope::new(RopeConfig::new(head_dim))?;

        let input = vec![1.0f32, 0.0, 0.0, 1.0];
        let q = Tensor::from_vec(input.clone(), (1, 1, 1, head_dim), &device)?;
        let k = q.clone();
        // pos_start = 1 places the single element at absolute position 1.
        let (q_rot, _) = rope.apply(&q, &k, 1)?;
        let values = q_rot.flatten_all()?.to_vec1::<f32>()?;

        // Pair 0 rotates by angle 1.0, pair 1 by 10000^(-1/2).
        let theta0 = 1.0f64;
        let theta1 = 10_000.0f64.powf(-0.5);
        let expected = [
            (input[0] as f64 * theta0.cos() - input[1] as f64 * theta0.sin()) as f32,
            (input[1] as f64 * theta0.cos() + input[0] as f64 * theta0.sin()) as f32,
            (input[2] as f64 * theta1.cos() - input[3] as f64 * theta1.sin()) as f32,
            (input[3] as f64 * theta1.cos() + input[2] as f64 * theta1.sin()) as f32,
        ];
        for (value, exp) in values.iter().zip(expected.iter()) {
            assert!((value - exp).abs() < 1e-5, "got {value}, expected {exp}");
        }
        Ok(())
    }

    #[test]
    fn odd_head_dim_is_rejected() {
        assert!(Rope::new(RopeConfig::new(5)).is_err());
        assert!(Rope::new(RopeConfig::new(0)).is_err());
    }

    #[test]
    fn table_cache_round_trips() -> Result<()> {
        let device = Device::Cpu;
        let cfg = RopeConfig::new(8);
        let (sin_a, cos_a) = get_sin_cos(16, &cfg, &device)?;
        let (sin_b, cos_b) = get_sin_cos(16, &cfg, &device)?;
        assert_eq!(sin_a.dims(), &[16, 4]);
        let diff = sin_a.sub(&sin_b)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert_eq!(diff, 0.0);
        let diff = cos_a.sub(&cos_b)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert_eq!(diff, 0.0);
        Ok(())
    }
}
