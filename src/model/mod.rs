// Model module - CNN training, persistence and inference
//
// Module organization:
// - network: UrbanSoundCnn (conv blocks + dense head)
// - split: seeded stratified train/validation split
// - metrics: ClassificationReport and ConfusionMatrix
// - trainer: Trainer (cache -> TrainedModel)
// - artifact: ModelArtifact (safetensors weights + JSON class list)
// - classifier: Classifier (artifact -> Prediction)

pub mod artifact;
pub mod classifier;
pub mod metrics;
pub mod network;
pub mod split;
pub mod trainer;

pub use artifact::ModelArtifact;
pub use classifier::{Classifier, Prediction};
pub use metrics::{ClassMetrics, ClassificationReport, ConfusionMatrix};
pub use network::{UrbanSoundCnn, MIN_INPUT_EXTENT};
pub use split::{stratified_split, SplitIndices};
pub use trainer::{EpochMetrics, TrainedModel, Trainer};
