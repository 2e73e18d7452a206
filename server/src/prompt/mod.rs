pub mod classifier;
pub mod mistral;

pub use classifier::{Classification, Classifier, ClassifierError, Decision};
pub use mistral::MistralClassifier;
