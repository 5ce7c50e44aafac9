mod decode;
mod emulate;
mod run;

pub use decode::decode;
pub use emulate::emulate;
pub use run::run;
