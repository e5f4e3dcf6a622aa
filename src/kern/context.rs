//! Execution Contexts - register save/restore
//!
//! This is the only module that steps outside ordinary memory safety. A
//! [`Context`] is the saved stack pointer of a suspended thread; everything
//! else it needs (callee-saved registers, FP control state, the resume
//! address) lives on that thread's own stack, pushed by [`switch`].
//!
//! A fresh context is prepared by laying out a fake switch frame at the top
//! of a new stack whose return address is a small bootstrap shim. The shim
//! moves the argument into the first argument register and calls the entry
//! function, which must never return.

/// Entry point of a freshly prepared context
pub type EntryFn = extern "C" fn(*const ()) -> !;

/// Saved execution state of a suspended thread
#[derive(Debug, Default)]
#[repr(C)]
pub struct Context {
    sp: usize,
}

impl Context {
    /// Context that has not been captured yet
    ///
    /// The bootstrap thread starts with one of these; the first switch away
    /// from it fills in the ambient process stack pointer.
    pub const fn empty() -> Self {
        Self { sp: 0 }
    }

    /// Whether a stack pointer has been saved or prepared
    pub fn is_captured(&self) -> bool {
        self.sp != 0
    }

    /// Prepare a context that runs `entry(arg)` on the stack ending at `top`
    ///
    /// # Safety
    /// `top` must be the (exclusive) upper end of a writable region of at
    /// least [`FRAME_BYTES`] bytes that stays alive and unused by anything
    /// else until the thread finishes.
    pub unsafe fn prepare(top: usize, entry: EntryFn, arg: *const ()) -> Self {
        let top = top & !0xF;
        // SAFETY: caller guarantees the frame below `top` is ours
        let sp = unsafe { arch::initial_frame(top, entry as usize, arg as usize) };
        Self { sp }
    }
}

/// Bytes consumed by the initial frame of a prepared context
pub const FRAME_BYTES: usize = arch::FRAME_WORDS * core::mem::size_of::<usize>();

/// Save the current state into `from` and resume `to`
///
/// Returns when some other thread switches back into `from`.
///
/// # Safety
/// `from` must be valid for writes and `to` must hold a context captured by
/// a previous `switch` or produced by [`Context::prepare`] whose stack is
/// still alive. No borrow of either may be live across the call.
#[inline(never)]
pub unsafe fn switch(from: *mut Context, to: *const Context) {
    debug_assert!(!core::ptr::eq(from, to), "switch to self");
    // SAFETY: forwarded from the caller
    unsafe { arch::switch_context(from, to) }
}

// ============================================================================
// x86_64 (System V)
// ============================================================================

#[cfg(target_arch = "x86_64")]
mod arch {
    use super::Context;

    /// mxcsr, r15, r14, r13, r12, rbx, rbp, return address
    pub(super) const FRAME_WORDS: usize = 8;

    /// Default MXCSR (0x1F80) in the low half, x87 control word (0x037F)
    /// at byte offset 4
    const FP_CONTROL_DEFAULT: usize = 0x0000_037F_0000_1F80;

    pub(super) unsafe fn initial_frame(top: usize, entry: usize, arg: usize) -> usize {
        let sp = top - FRAME_WORDS * 8;
        let frame = sp as *mut usize;
        // SAFETY: the caller owns [sp, top)
        unsafe {
            frame.write(FP_CONTROL_DEFAULT);
            frame.add(1).write(0); // r15
            frame.add(2).write(0); // r14
            frame.add(3).write(entry); // r13
            frame.add(4).write(arg); // r12
            frame.add(5).write(0); // rbx
            frame.add(6).write(0); // rbp
            frame.add(7).write(bootstrap as usize);
        }
        sp
    }

    #[unsafe(naked)]
    pub(super) unsafe extern "C" fn switch_context(_from: *mut Context, _to: *const Context) {
        core::arch::naked_asm!(
            "push rbp",
            "push rbx",
            "push r12",
            "push r13",
            "push r14",
            "push r15",
            "sub rsp, 8",
            "stmxcsr dword ptr [rsp]",
            "fnstcw word ptr [rsp + 4]",
            "mov [rdi], rsp",
            "mov rsp, [rsi]",
            "ldmxcsr dword ptr [rsp]",
            "fldcw word ptr [rsp + 4]",
            "add rsp, 8",
            "pop r15",
            "pop r14",
            "pop r13",
            "pop r12",
            "pop rbx",
            "pop rbp",
            "ret",
        );
    }

    /// First code run on a new stack: `r13(r12)`
    #[unsafe(naked)]
    unsafe extern "C" fn bootstrap() {
        core::arch::naked_asm!("mov rdi, r12", "call r13", "ud2");
    }
}

// ============================================================================
// AArch64 (AAPCS64)
// ============================================================================

#[cfg(target_arch = "aarch64")]
mod arch {
    use super::Context;

    /// x19-x30 then d8-d15
    pub(super) const FRAME_WORDS: usize = 20;

    pub(super) unsafe fn initial_frame(top: usize, entry: usize, arg: usize) -> usize {
        let sp = top - FRAME_WORDS * 8;
        let frame = sp as *mut usize;
        // SAFETY: the caller owns [sp, top)
        unsafe {
            for i in 0..FRAME_WORDS {
                frame.add(i).write(0);
            }
            frame.write(arg); // x19
            frame.add(1).write(entry); // x20
            frame.add(11).write(bootstrap as usize); // x30
        }
        sp
    }

    #[unsafe(naked)]
    pub(super) unsafe extern "C" fn switch_context(_from: *mut Context, _to: *const Context) {
        core::arch::naked_asm!(
            "sub sp, sp, #0xa0",
            "stp x19, x20, [sp, #0x00]",
            "stp x21, x22, [sp, #0x10]",
            "stp x23, x24, [sp, #0x20]",
            "stp x25, x26, [sp, #0x30]",
            "stp x27, x28, [sp, #0x40]",
            "stp x29, x30, [sp, #0x50]",
            "stp d8, d9, [sp, #0x60]",
            "stp d10, d11, [sp, #0x70]",
            "stp d12, d13, [sp, #0x80]",
            "stp d14, d15, [sp, #0x90]",
            "mov x9, sp",
            "str x9, [x0]",
            "ldr x9, [x1]",
            "mov sp, x9",
            "ldp x19, x20, [sp, #0x00]",
            "ldp x21, x22, [sp, #0x10]",
            "ldp x23, x24, [sp, #0x20]",
            "ldp x25, x26, [sp, #0x30]",
            "ldp x27, x28, [sp, #0x40]",
            "ldp x29, x30, [sp, #0x50]",
            "ldp d8, d9, [sp, #0x60]",
            "ldp d10, d11, [sp, #0x70]",
            "ldp d12, d13, [sp, #0x80]",
            "ldp d14, d15, [sp, #0x90]",
            "add sp, sp, #0xa0",
            "ret",
        );
    }

    /// First code run on a new stack: `x20(x19)`
    #[unsafe(naked)]
    unsafe extern "C" fn bootstrap() {
        core::arch::naked_asm!("mov x0, x19", "blr x20", "brk #0x1");
    }
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("udthread supports x86_64 and aarch64 only");

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    #[test]
    fn test_empty_context() {
        let ctx = Context::empty();
        assert!(!ctx.is_captured());
    }

    #[test]
    fn test_prepare_aligns_frame() {
        let mut stack = vec![0u8; 4096];
        let top = stack.as_mut_ptr() as usize + stack.len() - 3;
        extern "C" fn never(_: *const ()) -> ! {
            unreachable!()
        }
        let ctx = unsafe { Context::prepare(top, never, core::ptr::null()) };
        assert!(ctx.is_captured());
        assert_eq!((top & !0xF) - ctx.sp, FRAME_BYTES);
        assert_eq!(ctx.sp % 16, 0);
    }

    thread_local! {
        static ROUND_TRIP: Cell<(usize, usize)> = const { Cell::new((0, 0)) };
        static HITS: Cell<u32> = const { Cell::new(0) };
    }

    extern "C" fn bounce(arg: *const ()) -> ! {
        HITS.with(|h| h.set(h.get() + arg as usize as u32));
        let (own, back) = ROUND_TRIP.with(|r| r.get());
        unsafe { switch(own as *mut Context, back as *const Context) };
        unreachable!("bounced context resumed")
    }

    #[test]
    fn test_switch_round_trip() {
        let mut stack = vec![0u8; 64 * 1024];
        let top = stack.as_mut_ptr() as usize + stack.len();
        let mut main_ctx = Context::empty();
        let mut child = unsafe { Context::prepare(top, bounce, 7usize as *const ()) };
        ROUND_TRIP.with(|r| {
            r.set((
                &mut child as *mut Context as usize,
                &main_ctx as *const Context as usize,
            ))
        });

        unsafe { switch(&mut main_ctx, &child) };

        assert!(main_ctx.is_captured());
        assert_eq!(HITS.with(|h| h.get()), 7);
        drop(stack);
    }
}
