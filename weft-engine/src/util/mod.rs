mod gen_stream;

pub(crate) use gen_stream::GenStream;
