//! Parsers for the two boot image formats a sunxi FEL session stages:
//! the eGON header wrapping a Secondary Program Loader, and the mkimage
//! header wrapping a U-Boot firmware or script image. Neither parser
//! performs any I/O; both work directly on an in-memory buffer.

pub mod egon;
pub mod mkimage;
