use super::*;
use candle_core::{Device, Result};

fn idx(
    b: usize,
    h: usize,
    q: usize,
    k: usize,
    num_heads: usize,
    q_len: usize,
    k_len: usize,
) -> usize {
    ((((b * num_heads) + h) * q_len) + q) * k_len + k
}

#[test]
fn causal_mask_blocks_strictly_future_keys() -> Result<()> {
    let device = Device::Cpu;
    let num_heads = 2;
    let q_len = 3;
    let k_len = 3;

    let mask = build_causal_mask(&device, 1, num_heads, q_len, k_len)?;
    assert_eq!(mask.dims(), &[1, num_heads, q_len, k_len]);
    assert_eq!(mask.dtype(), MASK_DTYPE);

    let values = mask.flatten_all()?.to_vec1::<f32>()?;
    for h in 0..num_heads {
        for q in 0..q_len {
            for k in 0..k_len {
                let value = values[idx(0, h, q, k, num_heads, q_len, k_len)];
                if k > q {
                    assert_eq!(value, f32::NEG_INFINITY, "q={q} k={k} should be masked");
                } else {
                    assert_eq!(value, 0.0, "q={q} k={k} should be visible");
                }
            }
        }
    }
    Ok(())
}

#[test]
fn causal_mask_respects_prefix_offsets() -> Result<()> {
    let device = Device::Cpu;
    let num_heads = 2;
    let q_len = 3;
    let k_len = 5;

    let mask = build_causal_mask(&device, 1, num_heads, q_len, k_len)?;
    let values = mask.flatten_all()?.to_vec1::<f32>()?;

    // Earliest query can only see the prefix (offset = k_len - q_len).
    assert_eq!(values[idx(0, 0, 0, 2, num_heads, q_len, k_len)], 0.0);
    assert_eq!(
        values[idx(0, 0, 0, 3, num_heads, q_len, k_len)],
        f32::NEG_INFINITY
    );

    // Later queries gain access to more keys.
    assert_eq!(values[idx(0, 1, 2, 4, num_heads, q_len, k_len)], 0.0);
    Ok(())
}

#[test]
fn causal_mask_handles_single_token_cases() -> Result<()> {
    let device = Device::Cpu;

    let mask = build_causal_mask(&device, 1, 1, 1, 1)?;
    assert_eq!(mask.flatten_all()?.to_vec1::<f32>()?, vec![0.0]);

    let mask = build_causal_mask(&device, 1, 1, 1, 4)?;
    assert_eq!(
        mask.flatten_all()?.to_vec1::<f32>()?,
        vec![0.0, 0.0, 0.0, 0.0]
    );
    Ok(())
}
