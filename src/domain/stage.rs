// ============================================================
// Layer 3 — Stage
// ============================================================
// Every batch and every hook call happens inside exactly one
// stage. The training loop moves through them in a fixed order:
//
//   epoch 1: Train → Valid
//   epoch 2: Train → Valid
//   ...
//   once:    Test
//
// Only the Train stage updates weights. The other two stages
// additionally decode hypotheses and track the error rate.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Train,
    Valid,
    Test,
}

impl Stage {
    /// True for the stages that run without gradients
    pub fn is_eval(self) -> bool {
        !matches!(self, Stage::Train)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Train => "TRAIN",
            Stage::Valid => "VALID",
            Stage::Test  => "TEST",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_train_updates_weights() {
        assert!(!Stage::Train.is_eval());
        assert!(Stage::Valid.is_eval());
        assert!(Stage::Test.is_eval());
    }

    #[test]
    fn test_display_is_upper_case() {
        assert_eq!(Stage::Valid.to_string(), "VALID");
    }
}
