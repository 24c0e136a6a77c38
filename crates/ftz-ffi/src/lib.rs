mod types;
mod error;
mod context;

pub use types::*;
pub use error::*;
pub use context::*;

use std::ffi::CString;
use std::os::raw::c_char;

use ftz_tensor::{Conv2dGeometry, KernelConfig, Padding, Shape, Tensor};

/// Execute a closure that returns an `FtzStatus`, catching any panics
/// and converting them into `FtzStatus::ErrorInternal`.
///
/// Session handles hold a boxed backend that is not `RefUnwindSafe`, so the
/// closure is wrapped in `AssertUnwindSafe`.
fn catch_panic<F: FnOnce() -> FtzStatus>(f: F) -> FtzStatus {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(status) => status,
        Err(_) => {
            set_last_error("internal panic".to_string());
            FtzStatus::ErrorInternal
        }
    }
}

fn invalid(msg: &str) -> FtzStatus {
    set_last_error(msg.to_string());
    FtzStatus::ErrorInvalidArgument
}

/// Borrow `len` floats at `ptr`; a null pointer is only accepted for `len == 0`.
unsafe fn input_slice<'a>(ptr: *const f32, len: usize) -> Option<&'a [f32]> {
    if len == 0 {
        return Some(&[]);
    }
    if ptr.is_null() {
        return None;
    }
    Some(std::slice::from_raw_parts(ptr, len))
}

unsafe fn output_slice<'a>(ptr: *mut f32, len: usize) -> Option<&'a mut [f32]> {
    if len == 0 {
        return Some(&mut []);
    }
    if ptr.is_null() {
        return None;
    }
    Some(std::slice::from_raw_parts_mut(ptr, len))
}

/// Element count of `dims`, or `None` if the product overflows.
fn checked_numel(dims: &[usize]) -> Option<usize> {
    dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

unsafe fn read_dims4(ptr: *const usize) -> Option<Shape> {
    if ptr.is_null() {
        return None;
    }
    Some(Shape::from_slice(std::slice::from_raw_parts(ptr, 4)))
}

/// Create a new session.
///
/// `config` may be null, in which case settings are read from the
/// `FTZ_NUM_WORKERS`, `FTZ_BLOCK_SIZE` and `FTZ_FLUSH_CHUNK` environment
/// variables. On success, writes a heap-allocated `FtzSession` pointer into
/// `*session_out`; free it with `ftz_session_destroy`.
#[no_mangle]
pub unsafe extern "C" fn ftz_session_create(
    config: *const FtzConfig,
    session_out: *mut *mut FtzSession,
) -> FtzStatus {
    catch_panic(|| {
        if session_out.is_null() {
            return invalid("session_out is null");
        }
        let config = if config.is_null() {
            match KernelConfig::from_env() {
                Ok(c) => c,
                Err(e) => return fail(e),
            }
        } else {
            unsafe { &*config }.to_kernel_config()
        };
        match FtzSession::new(config) {
            Ok(session) => {
                unsafe {
                    *session_out = Box::into_raw(Box::new(session));
                }
                FtzStatus::Ok
            }
            Err(e) => fail(e),
        }
    })
}

/// Destroy a session previously created by `ftz_session_create`.
///
/// Passing a null pointer is a no-op and returns `FtzStatus::Ok`.
#[no_mangle]
pub unsafe extern "C" fn ftz_session_destroy(session: *mut FtzSession) -> FtzStatus {
    if session.is_null() {
        return FtzStatus::Ok;
    }
    drop(Box::from_raw(session));
    FtzStatus::Ok
}

/// Flush `len` floats at `data` in place.
#[no_mangle]
pub unsafe extern "C" fn ftz_flush_array(
    session: *mut FtzSession,
    data: *mut f32,
    len: usize,
    threshold: u32,
) -> FtzStatus {
    catch_panic(|| {
        if session.is_null() {
            return invalid("session is null");
        }
        let s = &unsafe { &*session }.session;
        let Some(data) = (unsafe { output_slice(data, len) }) else {
            return invalid("data is null");
        };
        match s.backend().flush(data, threshold, s.counter()) {
            Ok(()) => FtzStatus::Ok,
            Err(e) => fail(e),
        }
    })
}

/// `out[m, n] = a[m, k] @ b[k, n]` with flushing after every multiply and
/// add. `out` must hold `m * n` floats.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn ftz_matmul(
    session: *mut FtzSession,
    a: *const f32,
    b: *const f32,
    m: usize,
    k: usize,
    n: usize,
    threshold: u32,
    out: *mut f32,
) -> FtzStatus {
    catch_panic(|| {
        if session.is_null() {
            return invalid("session is null");
        }
        let s = &unsafe { &*session }.session;
        let (Some(a_len), Some(b_len), Some(c_len)) =
            (m.checked_mul(k), k.checked_mul(n), m.checked_mul(n))
        else {
            return invalid("matrix dims overflow");
        };
        let (Some(a), Some(b), Some(out)) = (unsafe {
            (
                input_slice(a, a_len),
                input_slice(b, b_len),
                output_slice(out, c_len),
            )
        }) else {
            return invalid("null matrix pointer");
        };
        match s.backend().matmul(a, b, m, k, n, threshold, s.counter()) {
            Ok(c) => {
                out.copy_from_slice(&c);
                FtzStatus::Ok
            }
            Err(e) => fail(e),
        }
    })
}

/// Write the NHWC output dims of a convolution into `out_dims[4]`.
///
/// `input_dims` is `[N, H, W, Cin]` and `kernel_dims` is
/// `[KH, KW, Cin, Cout]`.
#[no_mangle]
pub unsafe extern "C" fn ftz_conv2d_output_dims(
    input_dims: *const usize,
    kernel_dims: *const usize,
    padding: FtzPadding,
    stride_h: usize,
    stride_w: usize,
    out_dims: *mut usize,
) -> FtzStatus {
    catch_panic(|| {
        let (Some(input), Some(kernel)) =
            (unsafe { (read_dims4(input_dims), read_dims4(kernel_dims)) })
        else {
            return invalid("null dims pointer");
        };
        if out_dims.is_null() {
            return invalid("out_dims is null");
        }
        let geom = match Conv2dGeometry::new(&input, &kernel, padding.into(), (stride_h, stride_w)) {
            Ok(g) => g,
            Err(e) => return fail(e),
        };
        let dims = unsafe { std::slice::from_raw_parts_mut(out_dims, 4) };
        dims.copy_from_slice(geom.output_shape().dims());
        FtzStatus::Ok
    })
}

/// 2-D convolution of NHWC `input` with a `[KH, KW, Cin, Cout]` `kernel`.
///
/// `out` must hold `out_len` floats, exactly the element count of the dims
/// reported by `ftz_conv2d_output_dims`.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn ftz_convolve(
    session: *mut FtzSession,
    input: *const f32,
    input_dims: *const usize,
    kernel: *const f32,
    kernel_dims: *const usize,
    padding: FtzPadding,
    stride_h: usize,
    stride_w: usize,
    threshold: u32,
    out: *mut f32,
    out_len: usize,
) -> FtzStatus {
    catch_panic(|| {
        if session.is_null() {
            return invalid("session is null");
        }
        let s = &unsafe { &*session }.session;
        let (Some(input_shape), Some(kernel_shape)) =
            (unsafe { (read_dims4(input_dims), read_dims4(kernel_dims)) })
        else {
            return invalid("null dims pointer");
        };
        let (Some(input_len), Some(kernel_len)) = (
            checked_numel(input_shape.dims()),
            checked_numel(kernel_shape.dims()),
        ) else {
            return invalid("tensor dims overflow");
        };
        let (Some(input), Some(kernel), Some(out)) = (unsafe {
            (
                input_slice(input, input_len),
                input_slice(kernel, kernel_len),
                output_slice(out, out_len),
            )
        }) else {
            return invalid("null tensor pointer");
        };

        let input = Tensor::new(input.to_vec(), input_shape);
        let kernel = Tensor::new(kernel.to_vec(), kernel_shape);
        let padding: Padding = padding.into();
        let result = match s.convolve(&input, &kernel, padding, (stride_h, stride_w), threshold) {
            Ok(t) => t,
            Err(e) => return fail(e),
        };
        if result.data().len() != out_len {
            set_last_error(format!(
                "out_len={} but output {} holds {} elements",
                out_len,
                result.shape(),
                result.data().len()
            ));
            return FtzStatus::ErrorShape;
        }
        out.copy_from_slice(result.data());
        FtzStatus::Ok
    })
}

/// Write the session's total flush count into `*count_out`, zeroing the
/// counter afterwards when `reset` is true.
#[no_mangle]
pub unsafe extern "C" fn ftz_get_flush_count(
    session: *mut FtzSession,
    reset: bool,
    count_out: *mut u64,
) -> FtzStatus {
    catch_panic(|| {
        if session.is_null() || count_out.is_null() {
            return invalid("null argument");
        }
        let s = &mut unsafe { &mut *session }.session;
        let count = s.get_flush_count(reset);
        unsafe {
            *count_out = count;
        }
        FtzStatus::Ok
    })
}

/// Retrieve the last error message.
///
/// Returns a pointer to a C string describing the most recent error, or
/// null if no error has occurred. The caller must free the returned string
/// with `ftz_free_string`.
#[no_mangle]
pub extern "C" fn ftz_last_error() -> *mut c_char {
    match error::take_last_error() {
        Some(e) => e.into_raw(),
        None => std::ptr::null_mut(),
    }
}

/// Free a string previously returned by `ftz_last_error`.
#[no_mangle]
pub unsafe extern "C" fn ftz_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;
    use std::ptr;

    fn create(workers: u32) -> *mut FtzSession {
        let config = FtzConfig {
            num_workers: workers,
            ..Default::default()
        };
        let mut session = ptr::null_mut();
        let status = unsafe { ftz_session_create(&config, &mut session) };
        assert_eq!(status, FtzStatus::Ok);
        assert!(!session.is_null());
        session
    }

    fn last_error() -> String {
        let p = ftz_last_error();
        assert!(!p.is_null());
        let msg = unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned();
        unsafe { ftz_free_string(p) };
        msg
    }

    #[test]
    fn test_create_rejects_null_out() {
        let status = unsafe { ftz_session_create(ptr::null(), ptr::null_mut()) };
        assert_eq!(status, FtzStatus::ErrorInvalidArgument);
        assert_eq!(last_error(), "session_out is null");
        assert!(ftz_last_error().is_null());
    }

    #[test]
    fn test_destroy_null_is_ok() {
        assert_eq!(unsafe { ftz_session_destroy(ptr::null_mut()) }, FtzStatus::Ok);
    }

    #[test]
    fn test_flush_and_count() {
        let s = create(2);
        let mut data = [1.0e-40f32, 1.0, -2.0e-39, 3.0];
        let status = unsafe { ftz_flush_array(s, data.as_mut_ptr(), data.len(), 1) };
        assert_eq!(status, FtzStatus::Ok);
        assert_eq!(data, [0.0, 1.0, 0.0, 3.0]);

        let mut count = 0u64;
        assert_eq!(unsafe { ftz_get_flush_count(s, true, &mut count) }, FtzStatus::Ok);
        assert_eq!(count, 2);
        assert_eq!(unsafe { ftz_get_flush_count(s, false, &mut count) }, FtzStatus::Ok);
        assert_eq!(count, 0);
        unsafe { ftz_session_destroy(s) };
    }

    #[test]
    fn test_matmul() {
        let s = create(1);
        let a = [1.0f32, 2.0, 3.0, 4.0];
        let b = [5.0f32, 6.0, 7.0, 8.0];
        let mut out = [0.0f32; 4];
        let status =
            unsafe { ftz_matmul(s, a.as_ptr(), b.as_ptr(), 2, 2, 2, 0, out.as_mut_ptr()) };
        assert_eq!(status, FtzStatus::Ok);
        assert_eq!(out, [19.0, 22.0, 43.0, 50.0]);

        let status =
            unsafe { ftz_matmul(s, ptr::null(), b.as_ptr(), 2, 2, 2, 0, out.as_mut_ptr()) };
        assert_eq!(status, FtzStatus::ErrorInvalidArgument);
        unsafe { ftz_session_destroy(s) };
    }

    #[test]
    fn test_conv2d_output_dims() {
        let input = [2usize, 8, 8, 3];
        let kernel = [3usize, 3, 3, 4];
        let mut dims = [0usize; 4];
        let status = unsafe {
            ftz_conv2d_output_dims(
                input.as_ptr(),
                kernel.as_ptr(),
                FtzPadding::Same,
                2,
                2,
                dims.as_mut_ptr(),
            )
        };
        assert_eq!(status, FtzStatus::Ok);
        assert_eq!(dims, [2, 4, 4, 4]);

        let bad_kernel = [3usize, 3, 2, 4];
        let status = unsafe {
            ftz_conv2d_output_dims(
                input.as_ptr(),
                bad_kernel.as_ptr(),
                FtzPadding::Same,
                1,
                1,
                dims.as_mut_ptr(),
            )
        };
        assert_eq!(status, FtzStatus::ErrorShape);
        assert!(last_error().contains("channel"));
    }

    #[test]
    fn test_convolve() {
        let s = create(2);
        let input = [1.0f32; 9];
        let kernel = [1.0f32; 9];
        let input_dims = [1usize, 3, 3, 1];
        let kernel_dims = [3usize, 3, 1, 1];
        let mut out = [0.0f32; 9];
        let status = unsafe {
            ftz_convolve(
                s,
                input.as_ptr(),
                input_dims.as_ptr(),
                kernel.as_ptr(),
                kernel_dims.as_ptr(),
                FtzPadding::Same,
                1,
                1,
                1,
                out.as_mut_ptr(),
                out.len(),
            )
        };
        assert_eq!(status, FtzStatus::Ok);
        assert_eq!(out, [4.0, 6.0, 4.0, 6.0, 9.0, 6.0, 4.0, 6.0, 4.0]);

        let status = unsafe {
            ftz_convolve(
                s,
                input.as_ptr(),
                input_dims.as_ptr(),
                kernel.as_ptr(),
                kernel_dims.as_ptr(),
                FtzPadding::Same,
                1,
                1,
                1,
                out.as_mut_ptr(),
                4,
            )
        };
        assert_eq!(status, FtzStatus::ErrorShape);
        unsafe { ftz_session_destroy(s) };
    }

    #[test]
    fn test_panic_maps_to_internal() {
        let status = catch_panic(|| panic!("boom"));
        assert_eq!(status, FtzStatus::ErrorInternal);
        assert_eq!(last_error(), "internal panic");
    }

    #[test]
    fn test_matmul_rejects_overflowing_dims() {
        let s = create(1);
        let a = [1.0f32; 4];
        let mut out = [0.0f32; 4];
        let status = unsafe {
            ftz_matmul(s, a.as_ptr(), a.as_ptr(), usize::MAX, 2, 2, 0, out.as_mut_ptr())
        };
        assert_eq!(status, FtzStatus::ErrorInvalidArgument);
        assert_eq!(last_error(), "matrix dims overflow");
        unsafe { ftz_session_destroy(s) };
    }

    #[test]
    fn test_convolve_rejects_overflowing_dims() {
        let s = create(1);
        let data = [1.0f32; 4];
        let input_dims = [usize::MAX, 2, 2, 1];
        let kernel_dims = [1usize, 1, 1, 1];
        let mut out = [0.0f32; 4];
        let status = unsafe {
            ftz_convolve(
                s,
                data.as_ptr(),
                input_dims.as_ptr(),
                data.as_ptr(),
                kernel_dims.as_ptr(),
                FtzPadding::Valid,
                1,
                1,
                0,
                out.as_mut_ptr(),
                out.len(),
            )
        };
        assert_eq!(status, FtzStatus::ErrorInvalidArgument);
        assert_eq!(last_error(), "tensor dims overflow");
        unsafe { ftz_session_destroy(s) };
    }

    #[test]
    fn test_status_mapping() {
        use ftz_tensor::TensorError;
        assert_eq!(
            FtzStatus::from(&TensorError::WorkerCapacity { workers: 4, slots: 2 }),
            FtzStatus::ErrorCapacity
        );
        assert_eq!(
            FtzStatus::from(&TensorError::InvalidPadding("full".into())),
            FtzStatus::ErrorInvalidArgument
        );
        assert_eq!(
            FtzStatus::from(&TensorError::Config("x".into())),
            FtzStatus::ErrorConfig
        );
    }
}
