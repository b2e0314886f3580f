mod common;
mod recorder;
mod routing;
