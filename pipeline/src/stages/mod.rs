pub mod destinations;
pub mod detect_exceptions;
pub mod labels;
pub mod mounted_file;
pub mod plugin_alias;
pub mod relabel;
pub mod retag;
pub mod share;
pub mod tag_expansion;
pub mod thisns;
