pub mod continuous;
pub mod cwfss;
pub mod displacement;
pub mod ensemble;
pub mod fss;
pub mod ranking;
pub mod window;
