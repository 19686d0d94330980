// 电视媒体客户端播放引擎

pub mod core;
pub mod player;
pub mod server;
