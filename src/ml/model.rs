// ============================================================
// Layer 5 — RNN-Transducer Model
// ============================================================
// Three networks, combined additively:
//
//   feats [B, T, n_mels]
//     │
//     ▼
//   CRDNN encoder ─▶ enc_lin        transcription network  TN [B, T, J]
//
//   [bos] + labels [B, U+1]
//     │
//     ▼
//   Embedding ─▶ LSTM ─▶ dec_lin     prediction network     PN [B, U+1, J]
//
//   joint(t, u) = log_softmax( output( leaky_relu( TN[t] + PN[u] ) ) )
//                                                            [B, T, U+1, V]
//
// The CRDNN pools only along frequency, so the encoder keeps
// one output frame per feature frame.
//
// Reference: Graves (2012) Sequence Transduction with RNNs
//            Ravanelli et al. (2021) SpeechBrain (CRDNN)

use anyhow::Result;
use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BiLstm, BiLstmConfig,
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
        Lstm, LstmConfig, LstmState,
        PaddingConfig2d,
    },
    prelude::*,
    tensor::activation::{leaky_relu, log_softmax},
};

use crate::domain::traits::StepDecoder;

const LEAKY_SLOPE: f64 = 0.01;

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize
#[derive(Config, Debug)]
pub struct TransducerConfig {
    /// Feature dimension of the input
    pub n_mels:     usize,
    /// Labels including blank / bos / eos
    pub vocab_size: usize,
    #[config(default = 1)]
    pub cnn_blocks:   usize,
    #[config(default = 16)]
    pub cnn_channels: usize,
    #[config(default = 3)]
    pub cnn_kernel:   usize,
    #[config(default = 1)]
    pub rnn_layers:   usize,
    #[config(default = 64)]
    pub rnn_neurons:  usize,
    #[config(default = 64)]
    pub dnn_neurons:  usize,
    #[config(default = 32)]
    pub emb_dim:      usize,
    #[config(default = 64)]
    pub dec_neurons:  usize,
    #[config(default = 64)]
    pub joint_dim:    usize,
    #[config(default = 0.15)]
    pub dropout:      f64,
}

impl TransducerConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> TransducerModel<B> {
        let enc     = self.build_crdnn(device);
        let enc_lin = LinearConfig::new(self.dnn_neurons, self.joint_dim).init(device);
        let emb     = EmbeddingConfig::new(self.vocab_size, self.emb_dim).init(device);
        let dec     = LstmConfig::new(self.emb_dim, self.dec_neurons, true).init(device);
        let dec_lin = LinearConfig::new(self.dec_neurons, self.joint_dim).init(device);
        let output  = LinearConfig::new(self.joint_dim, self.vocab_size).init(device);
        TransducerModel { enc, enc_lin, emb, dec, dec_lin, output }
    }

    fn build_crdnn<B: Backend>(&self, device: &B::Device) -> Crdnn<B> {
        let mut freq = self.n_mels;
        let mut in_channels = 1;
        let mut cnn = Vec::with_capacity(self.cnn_blocks);
        for _ in 0..self.cnn_blocks {
            let conv = Conv2dConfig::new(
                [in_channels, self.cnn_channels],
                [self.cnn_kernel, self.cnn_kernel],
            )
            .with_padding(PaddingConfig2d::Same)
            .init(device);
            let norm = LayerNormConfig::new(freq).init(device);
            cnn.push(CnnBlock { conv, norm, dropout: DropoutConfig::new(self.dropout).init() });
            if freq >= 2 {
                freq /= 2;
            }
            in_channels = self.cnn_channels;
        }

        let mut rnn_input = in_channels * freq;
        let mut rnn = Vec::with_capacity(self.rnn_layers);
        for _ in 0..self.rnn_layers {
            rnn.push(BiLstmConfig::new(rnn_input, self.rnn_neurons, true).init(device));
            rnn_input = 2 * self.rnn_neurons;
        }

        Crdnn {
            cnn,
            rnn,
            dnn:      LinearConfig::new(rnn_input, self.dnn_neurons).init(device),
            dnn_norm: LayerNormConfig::new(self.dnn_neurons).init(device),
            dropout:  DropoutConfig::new(self.dropout).init(),
        }
    }
}

// ─── CRDNN encoder ────────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct CnnBlock<B: Backend> {
    pub conv:    Conv2d<B>,
    pub norm:    LayerNorm<B>,
    pub dropout: Dropout,
}

impl<B: Backend> CnnBlock<B> {
    /// [B, C_in, T, F] → [B, C_out, T, F / 2]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.norm.forward(self.conv.forward(x));
        let x = pool_frequency(leaky_relu(x, LEAKY_SLOPE));
        self.dropout.forward(x)
    }
}

/// Max over adjacent frequency pairs, `[B, C, T, F]` → `[B, C, T, F / 2]`.
/// An odd last bin is dropped and a single bin passes through.
///
/// Keep this off `MaxPool2d`: the ndarray 0.16 max-pool backward
/// misroutes gradients on non-square maps.
pub fn pool_frequency<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 4> {
    let [batch, channels, frames, freq] = x.dims();
    let half = freq / 2;
    if half == 0 {
        return x;
    }
    x.slice([0..batch, 0..channels, 0..frames, 0..half * 2])
        .reshape([batch, channels, frames, half, 2])
        .max_dim(4)
        .squeeze::<4>(4)
}

#[derive(Module, Debug)]
pub struct Crdnn<B: Backend> {
    pub cnn:      Vec<CnnBlock<B>>,
    pub rnn:      Vec<BiLstm<B>>,
    pub dnn:      Linear<B>,
    pub dnn_norm: LayerNorm<B>,
    pub dropout:  Dropout,
}

impl<B: Backend> Crdnn<B> {
    /// [B, T, n_mels] → [B, T, dnn_neurons]
    pub fn forward(&self, feats: Tensor<B, 3>) -> Tensor<B, 3> {
        let mut x = feats.unsqueeze_dim::<4>(1);
        for block in &self.cnn {
            x = block.forward(x);
        }

        // channels and frequency become one feature axis
        let [batch, channels, frames, freq] = x.dims();
        let mut x = x.swap_dims(1, 2).reshape([batch, frames, channels * freq]);

        for layer in &self.rnn {
            let (out, _) = layer.forward(x, None);
            x = self.dropout.forward(out);
        }

        let x = self.dnn_norm.forward(self.dnn.forward(x));
        self.dropout.forward(leaky_relu(x, LEAKY_SLOPE))
    }
}

// ─── Transducer ───────────────────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct TransducerModel<B: Backend> {
    pub enc:     Crdnn<B>,
    pub enc_lin: Linear<B>,
    pub emb:     Embedding<B>,
    pub dec:     Lstm<B>,
    pub dec_lin: Linear<B>,
    pub output:  Linear<B>,
}

pub struct TransducerOutput<B: Backend> {
    /// [B, T, U+1, V]
    pub log_probs: Tensor<B, 4>,
    /// Transcription network output [B, T, J], reused by the searcher
    pub encoded:   Tensor<B, 3>,
}

impl<B: Backend> TransducerModel<B> {
    /// Full lattice for a batch.
    pub fn forward(&self, feats: Tensor<B, 3>, tokens_bos: Tensor<B, 2, Int>) -> TransducerOutput<B> {
        let encoded = self.encode(feats);
        let (predicted, _) = self.predict(tokens_bos, None);

        let [batch, frames, joint_dim] = encoded.dims();
        let [_, labels, _] = predicted.dims();
        let shape = [batch, frames, labels, joint_dim];

        let tn = encoded.clone().unsqueeze_dim::<4>(2).expand(shape);
        let pn = predicted.unsqueeze_dim::<4>(1).expand(shape);
        TransducerOutput { log_probs: self.joint(tn, pn), encoded }
    }

    /// Transcription network: [B, T, n_mels] → [B, T, J]
    pub fn encode(&self, feats: Tensor<B, 3>) -> Tensor<B, 3> {
        self.enc_lin.forward(self.enc.forward(feats))
    }

    /// Prediction network: [B, U] tokens → [B, U, J]
    pub fn predict(
        &self,
        tokens: Tensor<B, 2, Int>,
        state:  Option<LstmState<B, 2>>,
    ) -> (Tensor<B, 3>, LstmState<B, 2>) {
        let embedded = self.emb.forward(tokens);
        let (out, state) = self.dec.forward(embedded, state);
        (self.dec_lin.forward(out), state)
    }

    /// Additive joint, log-softmax over the last axis.
    pub fn joint<const D: usize>(&self, tn: Tensor<B, D>, pn: Tensor<B, D>) -> Tensor<B, D> {
        let hidden = leaky_relu(tn + pn, LEAKY_SLOPE);
        log_softmax(self.output.forward(hidden), D - 1)
    }
}

// ─── Step-wise decoding ───────────────────────────────────────────────────────

/// Prediction network output and LSTM state after some prefix.
#[derive(Debug, Clone)]
pub struct DecoderState<B: Backend> {
    /// [1, J]
    pub output: Tensor<B, 2>,
    pub cell:   Tensor<B, 2>,
    pub hidden: Tensor<B, 2>,
}

/// One encoded utterance bound to the model, for the beam searcher.
pub struct UtteranceDecoder<'a, B: Backend> {
    model:   &'a TransducerModel<B>,
    /// [T, J]
    encoded: Tensor<B, 2>,
    frames:  usize,
}

impl<'a, B: Backend> UtteranceDecoder<'a, B> {
    /// `encoded` is the `[T, J]` slice of one utterance; only the
    /// first `frames` rows are decoded.
    pub fn new(model: &'a TransducerModel<B>, encoded: Tensor<B, 2>, frames: usize) -> Self {
        let frames = frames.min(encoded.dims()[0]);
        Self { model, encoded, frames }
    }
}

impl<B: Backend> StepDecoder for UtteranceDecoder<'_, B> {
    type State = DecoderState<B>;

    fn num_frames(&self) -> usize {
        self.frames
    }

    fn predict(&self, token: usize, state: Option<&Self::State>) -> Result<Self::State> {
        let device = self.encoded.device();
        let tokens = Tensor::<B, 1, Int>::from_ints([token as i32], &device).reshape([1, 1]);
        let lstm = state.map(|s| LstmState::new(s.cell.clone(), s.hidden.clone()));

        let (out, lstm) = self.model.predict(tokens, lstm);
        let [_, _, joint_dim] = out.dims();
        Ok(DecoderState {
            output: out.reshape([1, joint_dim]),
            cell:   lstm.cell,
            hidden: lstm.hidden,
        })
    }

    fn joint(&self, frame: usize, state: &Self::State) -> Result<Vec<f32>> {
        if frame >= self.frames {
            anyhow::bail!("frame {frame} out of {} frames", self.frames);
        }
        let [_, joint_dim] = self.encoded.dims();
        let tn = self.encoded.clone().slice([frame..frame + 1, 0..joint_dim]);
        let log_probs = self.model.joint(tn, state.output.clone());
        log_probs
            .into_data()
            .convert::<f32>()
            .to_vec()
            .map_err(|e| anyhow::anyhow!("cannot read joint output: {e:?}"))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn small_config() -> TransducerConfig {
        TransducerConfig::new(8, 6)
            .with_cnn_channels(4)
            .with_rnn_neurons(8)
            .with_dnn_neurons(8)
            .with_emb_dim(4)
            .with_dec_neurons(8)
            .with_joint_dim(8)
    }

    #[test]
    fn test_forward_shapes() {
        let device = Default::default();
        let model: TransducerModel<TestBackend> = small_config().init(&device);

        let feats = Tensor::<TestBackend, 3>::zeros([2, 5, 8], &device);
        let tokens = Tensor::<TestBackend, 2, Int>::from_ints([[1, 3, 4], [1, 5, 0]], &device);
        let out = model.forward(feats, tokens);

        assert_eq!(out.encoded.dims(), [2, 5, 8]);
        assert_eq!(out.log_probs.dims(), [2, 5, 3, 6]);
    }

    #[test]
    fn test_joint_is_normalized() {
        let device = Default::default();
        let model: TransducerModel<TestBackend> = small_config().init(&device);
        let feats = Tensor::<TestBackend, 3>::ones([1, 3, 8], &device);
        let tokens = Tensor::<TestBackend, 2, Int>::from_ints([[1, 2]], &device);
        let probs = model.forward(feats, tokens).log_probs.exp().sum_dim(3);

        let sums: Vec<f32> = probs.into_data().convert::<f32>().to_vec().unwrap();
        assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-4));
    }

    #[test]
    fn test_step_decoder_matches_batch_lattice() {
        let device = Default::default();
        let model: TransducerModel<TestBackend> = small_config().init(&device);
        let feats = Tensor::<TestBackend, 3>::random([1, 4, 8], burn::tensor::Distribution::Default, &device);
        let tokens = Tensor::<TestBackend, 2, Int>::from_ints([[1, 3]], &device);
        let out = model.forward(feats, tokens);

        let encoded = out.encoded.clone().reshape([4, 8]);
        let decoder = UtteranceDecoder::new(&model, encoded, 4);
        assert_eq!(decoder.num_frames(), 4);

        let after_bos = decoder.predict(1, None).unwrap();
        let after_3 = decoder.predict(3, Some(&after_bos)).unwrap();
        let step = decoder.joint(2, &after_3).unwrap();

        let lattice: Vec<f32> = out.log_probs.into_data().convert::<f32>().to_vec().unwrap();
        // [0, t=2, u=1, :]
        let offset = (2 * 2 + 1) * 6;
        for (a, b) in step.iter().zip(&lattice[offset..offset + 6]) {
            assert!((a - b).abs() < 1e-4);
        }
        assert!(decoder.joint(4, &after_3).is_err());
    }

    #[test]
    fn test_pool_frequency_routes_gradient_to_the_max() {
        type Ad = burn::backend::Autodiff<NdArray>;
        let device = Default::default();
        // larger value of each pair alternates between the two bins
        let x = Tensor::<Ad, 1>::from_floats(
            [1.0, 2.0, 4.0, 3.0, 5.0, 6.0, 8.0, 7.0, 9.0, 10.0, 12.0, 11.0],
            &device,
        )
        .reshape([1, 1, 3, 4])
        .require_grad();

        let pooled = pool_frequency(x.clone());
        assert_eq!(pooled.dims(), [1, 1, 3, 2]);
        let values: Vec<f32> = pooled.clone().into_data().convert::<f32>().to_vec().unwrap();
        assert_eq!(values, vec![2.0, 4.0, 6.0, 8.0, 10.0, 12.0]);

        let grads = pooled.sum().backward();
        let grad: Vec<f32> = x.grad(&grads).unwrap().into_data().convert::<f32>().to_vec().unwrap();
        assert_eq!(grad, vec![0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_pool_frequency_odd_and_single_bins() {
        let device = Default::default();
        let odd = Tensor::<TestBackend, 1>::from_floats([3.0, 1.0, 9.0], &device).reshape([1, 1, 1, 3]);
        let out: Vec<f32> = pool_frequency(odd).into_data().convert::<f32>().to_vec().unwrap();
        assert_eq!(out, vec![3.0]);

        let single = Tensor::<TestBackend, 4>::ones([1, 2, 3, 1], &device);
        assert_eq!(pool_frequency(single).dims(), [1, 2, 3, 1]);
    }

    #[test]
    fn test_encoder_backward_with_more_frames_than_mels() {
        type Ad = burn::backend::Autodiff<NdArray>;
        let device = Default::default();
        let model: TransducerModel<Ad> = TransducerConfig::new(40, 6)
            .with_cnn_channels(2)
            .with_rnn_neurons(4)
            .with_dnn_neurons(4)
            .with_joint_dim(4)
            .init(&device);

        let feats = Tensor::<Ad, 3>::random([1, 41, 40], burn::tensor::Distribution::Default, &device)
            .require_grad();
        let encoded = model.encode(feats.clone());
        assert_eq!(encoded.dims(), [1, 41, 4]);

        let grads = encoded.sum().backward();
        let grad: Vec<f32> = feats.grad(&grads).unwrap().into_data().convert::<f32>().to_vec().unwrap();
        assert_eq!(grad.len(), 41 * 40);
        assert!(grad.iter().all(|g| g.is_finite()));
    }
}
