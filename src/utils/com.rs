use windows::{
    Win32::System::Com::{COINIT_APARTMENTTHREADED, CoInitializeEx, CoUninitialize},
    core::HRESULT,
};

/// Single-threaded COM apartment for the current thread, left on drop.
///
/// Nests: a thread already in an STA gets `S_FALSE` and the matching
/// uninitialize. A thread already in the MTA keeps it and nothing is
/// released.
pub(crate) struct ComApartment(HRESULT);

impl ComApartment {
    pub(crate) fn enter() -> Self {
        Self(unsafe { CoInitializeEx(None, COINIT_APARTMENTTHREADED) })
    }

    /// True when this guard owns a reference on the apartment.
    pub(crate) fn is_entered(&self) -> bool {
        self.0.is_ok()
    }
}

impl Drop for ComApartment {
    fn drop(&mut self) {
        if self.is_entered() {
            unsafe { CoUninitialize() };
        }
    }
}
