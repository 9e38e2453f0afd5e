pub mod context;
pub mod note;
pub mod quality;
pub mod recommend;
pub mod scale;
