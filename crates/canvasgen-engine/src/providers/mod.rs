mod dryrun;
mod imagen;
mod openai;
mod replicate;

pub use dryrun::DryrunAdapter;
pub use imagen::ImagenAdapter;
pub use openai::OpenAiAdapter;
pub use replicate::ReplicateAdapter;
