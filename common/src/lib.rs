/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    File contains exports for the veriboot common library.

--*/

#![cfg_attr(not(feature = "std"), no_std)]

mod memcmp;
mod okref;
pub mod printer;

pub use memcmp::safe_memcmp;
pub use okref::okref;
pub use printer::HexBytes;
