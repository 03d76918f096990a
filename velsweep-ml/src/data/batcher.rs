use burn::{
    data::dataloader::batcher::Batcher,
    tensor::{backend::Backend, Tensor, TensorData},
};

use crate::data::dataset::SpectrogramItem;

/// A batch of spectrograms and their velocity targets.
#[derive(Debug, Clone)]
pub struct SpectrogramBatch<B: Backend> {
    /// `[batch, 1, height, width]`
    pub spectrogram: Tensor<B, 4>,
    /// `[batch]`
    pub target: Tensor<B, 1>,
}

/// Stacks items into tensors on the device the data loader hands it.
#[derive(Clone, Copy, Debug, Default)]
pub struct SpectrogramBatcher;

impl<B: Backend> Batcher<B, SpectrogramItem, SpectrogramBatch<B>> for SpectrogramBatcher {
    fn batch(&self, items: Vec<SpectrogramItem>, device: &B::Device) -> SpectrogramBatch<B> {
        let batch_size = items.len();
        let (height, width) = items
            .first()
            .map(|item| (item.spectrogram.height, item.spectrogram.width))
            .unwrap_or((0, 0));

        let values: Vec<f32> = items
            .iter()
            .flat_map(|item| item.spectrogram.values.iter().copied())
            .collect();
        let targets: Vec<f32> = items.iter().map(|item| item.target).collect();

        let spectrogram = Tensor::<B, 4>::from_data(
            TensorData::new(values, [batch_size, 1, height, width]),
            device,
        );
        let target = Tensor::<B, 1>::from_data(TensorData::new(targets, [batch_size]), device);

        SpectrogramBatch {
            spectrogram,
            target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::spectrogram::Spectrogram;
    use burn::backend::NdArray;

    #[test]
    fn test_batch_shapes() {
        let item = |target| SpectrogramItem {
            file: "f".into(),
            spectrogram: Spectrogram::new(2, 3, vec![1.0; 6]).unwrap(),
            target,
        };
        let device: <NdArray as Backend>::Device = Default::default();
        let batch: SpectrogramBatch<NdArray> =
            SpectrogramBatcher.batch(vec![item(1.0), item(-4.0), item(2.5)], &device);

        assert_eq!(batch.spectrogram.dims(), [3, 1, 2, 3]);
        assert_eq!(batch.target.dims(), [3]);
        let targets: Vec<f32> = batch.target.into_data().to_vec().unwrap();
        assert_eq!(targets, vec![1.0, -4.0, 2.5]);
    }
}
