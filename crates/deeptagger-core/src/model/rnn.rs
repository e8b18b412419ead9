//! Single-layer GRU over right-padded batches.
//!
//! Padding is handled with a per-step mask instead of packing: at a padded
//! step the hidden state is carried over unchanged and the output is zero.
//! Because padding only trails, the reverse direction stays at its zero
//! initial state until it reaches each sequence's last real token.
//!
//! Each direction is a [`candle_nn::rnn::GRU`] registered in the
//! [`ParameterStore`] as `weight_ih_l0`, `weight_hh_l0`, `bias_ih_l0` and
//! `bias_hh_l0`, with a `_reverse` suffix for the backward direction.

use candle_core::{D, Tensor};
use candle_nn::Init;
use candle_nn::rnn::{Direction, GRU, GRUConfig, GRUState, RNN, gru};

use super::params::{ParameterStore, xavier_uniform};
use crate::error::Result;

fn gru_config(input_size: usize, hidden_size: usize) -> GRUConfig {
    let gates = 3 * hidden_size;
    GRUConfig {
        w_ih_init: xavier_uniform(input_size, gates),
        w_hh_init: xavier_uniform(hidden_size, gates),
        b_ih_init: Some(Init::Const(0.0)),
        b_hh_init: Some(Init::Const(0.0)),
    }
}

fn build_direction(
    store: &mut ParameterStore,
    prefix: &str,
    input_size: usize,
    hidden_size: usize,
    direction: Direction,
) -> Result<GRU> {
    let suffix = match direction {
        Direction::Forward => "",
        Direction::Backward => "_reverse",
    };
    for kind in ["weight_ih", "weight_hh", "bias_ih", "bias_hh"] {
        store.ensure_unregistered(&format!("{prefix}.{kind}_l0{suffix}"))?;
    }
    let config = gru_config(input_size, hidden_size);
    let vb = match direction {
        Direction::Forward => store.var_builder(),
        Direction::Backward => store
            .var_builder()
            .rename_f(|name| format!("{name}_reverse")),
    };
    Ok(gru(input_size, hidden_size, config, vb.pp(prefix))?)
}

/// Run `cell` over `(B, T, I)` with a `(B, T)` float mask, in reverse when
/// asked.
fn run_masked(cell: &GRU, xs: &Tensor, mask: &Tensor, reverse: bool) -> Result<Tensor> {
    let (batch_size, seq_len, _) = xs.dims3()?;
    let mut state = cell.zero_state(batch_size)?;
    let mut outputs = Vec::with_capacity(seq_len);

    let steps: Box<dyn Iterator<Item = usize>> = if reverse {
        Box::new((0..seq_len).rev())
    } else {
        Box::new(0..seq_len)
    };
    for t in steps {
        let x = xs.narrow(1, t, 1)?.squeeze(1)?.contiguous()?;
        let m = mask.narrow(1, t, 1)?.contiguous()?;
        let candidate = cell.step(&x, &state)?;
        let out = candidate.h().broadcast_mul(&m)?;
        let h = (&out + state.h().broadcast_mul(&m.affine(-1.0, 1.0)?)?)?;
        state = GRUState { h };
        outputs.push(out);
    }
    if reverse {
        outputs.reverse();
    }
    Ok(Tensor::stack(&outputs, 1)?)
}

/// One GRU layer, optionally bidirectional. Hidden state starts at zero on
/// every call.
#[derive(Debug, Clone)]
pub struct MaskedGru {
    forward: GRU,
    backward: Option<GRU>,
    hidden_size: usize,
}

impl MaskedGru {
    /// Register `<prefix>.weight_ih_l0` etc., plus `…_reverse` copies when
    /// bidirectional. Weights are Xavier-uniform, biases zero.
    pub fn build(
        store: &mut ParameterStore,
        prefix: &str,
        input_size: usize,
        hidden_size: usize,
        bidirectional: bool,
    ) -> Result<Self> {
        let forward = build_direction(store, prefix, input_size, hidden_size, Direction::Forward)?;
        let backward = if bidirectional {
            Some(build_direction(
                store,
                prefix,
                input_size,
                hidden_size,
                Direction::Backward,
            )?)
        } else {
            None
        };
        Ok(Self {
            forward,
            backward,
            hidden_size,
        })
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn is_bidirectional(&self) -> bool {
        self.backward.is_some()
    }

    /// Output width: `H`, or `2H` when bidirectional.
    pub fn output_size(&self) -> usize {
        if self.is_bidirectional() {
            2 * self.hidden_size
        } else {
            self.hidden_size
        }
    }

    /// `xs`: `(B, T, I)`, `mask`: `(B, T)` of 0/1 floats -> `(B, T, out)`.
    /// Outputs at masked positions are zero.
    pub fn forward(&self, xs: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let forward = run_masked(&self.forward, xs, mask, false)?;
        match &self.backward {
            Some(cell) => {
                let backward = run_masked(cell, xs, mask, true)?;
                Ok(Tensor::cat(&[&forward, &backward], D::Minus1)?)
            }
            None => Ok(forward),
        }
    }
}
