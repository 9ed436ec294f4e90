// Licensed under the Apache-2.0 license

/// Borrow the `Ok` variant of a result without copying it.
///
/// Results with large `Ok` variants tend to get memcpy'd out of their
/// original stack slot when unwrapped with `?`. `okref` converts a
/// `&Result<T, E>` into a `Result<&T, E>` so callers can keep working with
/// the value in place:
///
/// ```
/// use veriboot_common::okref;
///
/// fn some_function() -> Result<[u32; 64], u32> {
///     Ok([0u32; 64])
/// }
/// fn compute(val: &[u32; 64]) {}
///
/// fn main() -> std::result::Result<(), u32> {
///     let value = some_function();
///     let value = okref(&value)?;
///     compute(value);
///     Ok(())
/// }
/// ```
pub fn okref<T, E: Copy>(r: &Result<T, E>) -> Result<&T, E> {
    match r {
        Ok(r) => Ok(r),
        Err(e) => Err(*e),
    }
}
