use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use embedding::{TokenEmbedding, TokenEmbeddingConfig};

fn build_config(vocab: usize, hidden: usize) -> TokenEmbeddingConfig {
    TokenEmbeddingConfig {
        vocab_size: vocab,
        hidden_dim: hidden,
        dtype: DType::F32,
        device: Device::Cpu,
    }
}

#[test]
fn lookup_returns_matching_rows() -> Result<()> {
    let vocab = 4;
    let hidden = 3;
    let device = Device::Cpu;
    let weight = Tensor::from_vec(
        (0..vocab * hidden).map(|i| i as f32).collect::<Vec<_>>(),
        (vocab, hidden),
        &device,
    )?;
    let embedding = TokenEmbedding::from_weight(build_config(vocab, hidden), weight)?;

    let ids = Tensor::from_slice(&[2i64, 0], (1, 2), &device)?;
    let output = embedding.forward(&ids)?;
    assert_eq!(output.dims(), &[1, 2, hidden]);
    let values = output.flatten_all()?.to_vec1::<f32>()?;
    assert_eq!(values, vec![6.0, 7.0, 8.0, 0.0, 1.0, 2.0]);
    Ok(())
}

#[test]
fn out_of_range_ids_are_rejected() -> Result<()> {
    let embedding = TokenEmbedding::new(build_config(8, 4))?;
    let device = Device::Cpu;

    let too_large = Tensor::from_slice(&[7i64, 8], (1, 2), &device)?;
    assert!(embedding.forward(&too_large).is_err());

    let negative = Tensor::from_slice(&[-1i64, 0], (1, 2), &device)?;
    assert!(embedding.forward(&negative).is_err());

    let float_ids = Tensor::from_slice(&[0f32, 1.0], (1, 2), &device)?;
    assert!(embedding.forward(&float_ids).is_err());
    Ok(())
}

#[test]
fn from_weight_rejects_shape_mismatch() {
    let device = Device::Cpu;
    let wrong = Tensor::zeros((8, 5), DType::F32, &device).unwrap();
    assert!(TokenEmbedding::from_weight(build_config(8, 4), wrong).is_err());
}

#[test]
fn tied_readout_uses_the_same_storage() -> Result<()> {
    let vocab = 4;
    let hidden = 2;
    let device = Device::Cpu;
    let weight = Tensor::from_vec(
        vec![1.0f32, 0.0, 0.0, 1.0, 1.0, 1.0, -1.0, 2.0],
        (vocab, hidden),
        &device,
    )?;
    let embedding = TokenEmbedding::from_weight(build_config(vocab, hidden), weight)?;

    // logits = hidden @ W^T; row i of W scores token i.
    let hidden_state = Tensor::from_vec(vec![2.0f32, -1.0], (1, 1, hidden), &device)?;
    let logits = embedding.linear_out(&hidden_state)?;
    let values = logits.flatten_all()?.to_vec1::<f32>()?;
    assert_eq!(values, vec![2.0, -1.0, 1.0, -4.0]);

    // Mutating the table must change both the lookup and the logits.
    let replacement = Tensor::full(0.5f32, (vocab, hidden), &device)?;
    embedding.copy_weight_from(&replacement)?;

    let ids = Tensor::from_slice(&[3i64], (1, 1), &device)?;
    let looked_up = embedding.forward(&ids)?.flatten_all()?.to_vec1::<f32>()?;
    assert_eq!(looked_up, vec![0.5, 0.5]);

    let logits = embedding.linear_out(&hidden_state)?;
    let values = logits.flatten_all()?.to_vec1::<f32>()?;
    assert_eq!(values, vec![0.5, 0.5, 0.5, 0.5]);
    Ok(())
}
