use crate::data::model::Sample;
use crate::error::Result;

/// One stage of a sample pipeline: takes a `{parameters, waveform}` record and
/// returns a new one.
///
/// Stages are shared between threads by the basis driver and must not rely on
/// interior mutation for their output.
pub trait Transform: Send + Sync {
    fn apply(&self, sample: Sample) -> Result<Sample>;

    /// Identity used to omit the stage from a chain. Defaults to the type name.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// The [`Transform::name`] a stage of type `T` reports by default.
pub fn transform_name<T: Transform>() -> &'static str {
    std::any::type_name::<T>()
}

impl<F> Transform for F
where
    F: Fn(Sample) -> Result<Sample> + Send + Sync,
{
    fn apply(&self, sample: Sample) -> Result<Sample> {
        self(sample)
    }
}
