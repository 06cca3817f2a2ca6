pub(crate) mod d3d11;
pub(crate) mod duplication;
pub(crate) mod surface;
pub(crate) mod timer;
pub(crate) mod window;
