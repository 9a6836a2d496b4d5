/// Delay grows by a fixed step per attempt up to a cap.
pub mod linear;
