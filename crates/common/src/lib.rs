// annolab-common: wire protocol and annotation types shared by the annolab workspace

pub mod project;
pub mod protocol;
pub mod types;
