mod buffer;
mod count_buffer;
mod double_buffered;

pub use self::buffer::*;
pub use self::count_buffer::*;
pub use self::double_buffered::*;
