/// Mock display hardware for unit tests (no GPU or DRM device required)
///
/// Provides a kernel mode-setting device, a device dispatch table and a
/// buffer allocator that record every call, so the presentation engine can
/// be exercised end to end in-process.

use std::collections::VecDeque;
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use drm_fourcc::{DrmFormat, DrmFourcc, DrmModifier};
use rustc_hash::FxHashMap;

use crate::allocator::{
    AllocError, AllocFormat, AllocateFlags, AllocateInfo, AllocationResult, BufferAllocator,
    ALLOCATOR_INTERFACE_VERSION,
};
use crate::display::{
    fourcc_plane_count, ConnectorId, CrtcId, DisplayMode, DrmDisplay, FramebufferDesc, FramebufferId,
    GemHandle, KmsDevice, ModeInfo, PageFlipEvent, MAX_FB_PLANES, MODE_TYPE_PREFERRED,
};
use crate::error::{Error, Result};
use crate::swapchain::{
    CompressionControl, DeviceDispatch, ExternalImageFormatProperties, ExternalMemoryFeatures,
    ExternalMemoryHandleType, Extent3D, FenceHandle, ImageCreateFlags, ImageCreateInfo, ImageDesc, ImageHandle,
    MemoryBinding, MemoryHandle, ModifierProperties, QueueHandle, SemaphoreHandle, SharingMode,
};

pub const MOCK_CRTC: CrtcId = CrtcId(41);
pub const MOCK_CONNECTOR: ConnectorId = ConnectorId(42);

/// Raw value of VK_FORMAT_B8G8R8A8_UNORM
pub const MOCK_API_FORMAT: i32 = 44;

// ============================================================================
// Mock KMS device
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KmsCall {
    PrimeFdToHandle(GemHandle),
    CloseGemHandle(GemHandle),
    AddFramebuffer { desc: FramebufferDesc, with_modifiers: bool, id: FramebufferId },
    RemoveFramebuffer(FramebufferId),
    SetCrtc { crtc: CrtcId, framebuffer: FramebufferId, connector: ConnectorId },
    PageFlip { crtc: CrtcId, framebuffer: FramebufferId },
    WaitForEvent,
    HandleEvents,
}

/// Kernel device double
///
/// `wait_for_event` replays `wait_script` first, then reports an event
/// whenever a flip is pending. `handle_events` completes the pending flip.
#[derive(Default)]
pub struct MockKmsDevice {
    pub calls: Mutex<Vec<KmsCall>>,
    pub wait_script: Mutex<VecDeque<io::Result<bool>>>,
    pub fail_prime: AtomicBool,
    pub fail_add_framebuffer: AtomicBool,
    pub fail_set_crtc: AtomicBool,
    pub fail_page_flip: AtomicBool,
    pub fail_handle_events_once: AtomicBool,
    /// Report flips on another CRTC before our own completes
    pub foreign_flip_first: AtomicBool,
    pending_flip: Mutex<Option<FramebufferId>>,
    scanout: Mutex<Option<FramebufferId>>,
    next_framebuffer: AtomicU32,
    sequence: AtomicU32,
}

impl MockKmsDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<KmsCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Framebuffer currently scanned out
    pub fn scanout(&self) -> Option<FramebufferId> {
        *self.scanout.lock().unwrap()
    }

    pub fn script_waits(&self, results: impl IntoIterator<Item = io::Result<bool>>) {
        self.wait_script.lock().unwrap().extend(results);
    }

    pub fn count(&self, pred: impl Fn(&KmsCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|call| pred(call)).count()
    }

    fn record(&self, call: KmsCall) {
        self.calls.lock().unwrap().push(call);
    }
}

fn mock_errno(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

impl KmsDevice for MockKmsDevice {
    fn prime_fd_to_handle(&self, fd: BorrowedFd<'_>) -> io::Result<GemHandle> {
        if self.fail_prime.load(Ordering::SeqCst) {
            return Err(mock_errno(22));
        }
        // Same buffer, same handle, like the kernel
        let handle = GemHandle(1000 + fd.as_raw_fd() as u32);
        self.record(KmsCall::PrimeFdToHandle(handle));
        Ok(handle)
    }

    fn close_gem_handle(&self, handle: GemHandle) -> io::Result<()> {
        self.record(KmsCall::CloseGemHandle(handle));
        Ok(())
    }

    fn add_framebuffer(&self, desc: &FramebufferDesc, with_modifiers: bool) -> io::Result<FramebufferId> {
        if self.fail_add_framebuffer.load(Ordering::SeqCst) {
            return Err(mock_errno(22));
        }
        let id = FramebufferId(100 + self.next_framebuffer.fetch_add(1, Ordering::SeqCst));
        self.record(KmsCall::AddFramebuffer { desc: desc.clone(), with_modifiers, id });
        Ok(id)
    }

    fn remove_framebuffer(&self, framebuffer: FramebufferId) -> io::Result<()> {
        self.record(KmsCall::RemoveFramebuffer(framebuffer));
        Ok(())
    }

    fn set_crtc(
        &self,
        crtc: CrtcId,
        framebuffer: FramebufferId,
        connector: ConnectorId,
        _mode: &ModeInfo,
    ) -> io::Result<()> {
        self.record(KmsCall::SetCrtc { crtc, framebuffer, connector });
        if self.fail_set_crtc.load(Ordering::SeqCst) {
            return Err(mock_errno(13));
        }
        *self.scanout.lock().unwrap() = Some(framebuffer);
        Ok(())
    }

    fn page_flip(&self, crtc: CrtcId, framebuffer: FramebufferId) -> io::Result<()> {
        self.record(KmsCall::PageFlip { crtc, framebuffer });
        if self.fail_page_flip.load(Ordering::SeqCst) {
            return Err(mock_errno(16));
        }
        *self.pending_flip.lock().unwrap() = Some(framebuffer);
        Ok(())
    }

    fn wait_for_event(&self, _timeout: Duration) -> io::Result<bool> {
        self.record(KmsCall::WaitForEvent);
        if let Some(result) = self.wait_script.lock().unwrap().pop_front() {
            return result;
        }
        Ok(self.pending_flip.lock().unwrap().is_some())
    }

    fn handle_events(&self, on_page_flip: &mut dyn FnMut(PageFlipEvent)) -> io::Result<()> {
        self.record(KmsCall::HandleEvents);
        if self.fail_handle_events_once.swap(false, Ordering::SeqCst) {
            return Err(mock_errno(5));
        }
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        if self.foreign_flip_first.swap(false, Ordering::SeqCst) {
            on_page_flip(PageFlipEvent { crtc: CrtcId(MOCK_CRTC.0 + 1), sequence });
            return Ok(());
        }
        if let Some(framebuffer) = self.pending_flip.lock().unwrap().take() {
            *self.scanout.lock().unwrap() = Some(framebuffer);
            on_page_flip(PageFlipEvent { crtc: MOCK_CRTC, sequence });
        }
        Ok(())
    }
}

pub fn mock_mode() -> DisplayMode {
    DisplayMode::from_mode_info(ModeInfo {
        clock: 148_500,
        hdisplay: 1920,
        hsync_start: 2008,
        hsync_end: 2052,
        htotal: 2200,
        vdisplay: 1080,
        vsync_start: 1084,
        vsync_end: 1089,
        vtotal: 1125,
        vrefresh: 60,
        mode_type: MODE_TYPE_PREFERRED,
        name: "1920x1080".to_string(),
        ..Default::default()
    })
}

/// Display on `device` accepting `formats`
pub fn mock_display(
    device: Arc<MockKmsDevice>,
    formats: impl IntoIterator<Item = DrmFormat>,
    supports_fb_modifiers: bool,
) -> DrmDisplay {
    DrmDisplay::new(device, MOCK_CRTC, MOCK_CONNECTOR, mock_mode(), formats, supports_fb_modifiers)
}

pub fn xrgb(modifier: DrmModifier) -> DrmFormat {
    DrmFormat { code: DrmFourcc::Xrgb8888, modifier }
}

// ============================================================================
// Mock device dispatch
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchCall {
    CreateImage(ImageCreateInfo),
    DestroyImage(ImageHandle),
    ImportMemory(MemoryHandle),
    BindImageMemory { image: ImageHandle, bindings: Vec<MemoryBinding> },
    FreeMemory(MemoryHandle),
    CreateFence(FenceHandle),
    ResetFence(FenceHandle),
    SubmitFencePayload { queue: QueueHandle, semaphores: Vec<SemaphoreHandle>, fence: FenceHandle },
    WaitFence(FenceHandle),
    DestroyFence(FenceHandle),
}

/// Device double
///
/// Every modifier in `modifiers` is reported with `external` unless it has
/// an entry in `external_overrides`.
pub struct MockDeviceDispatch {
    pub calls: Mutex<Vec<DispatchCall>>,
    pub modifiers: Mutex<Vec<ModifierProperties>>,
    pub external: Mutex<ExternalImageFormatProperties>,
    pub external_overrides: Mutex<FxHashMap<u64, Option<ExternalImageFormatProperties>>>,
    pub fail_create_image: AtomicBool,
    pub fail_create_fence: AtomicBool,
    pub fail_bind: AtomicBool,
    pub wait_script: Mutex<VecDeque<Result<()>>>,
    next_handle: AtomicU64,
}

impl MockDeviceDispatch {
    /// Device reporting linear Xrgb8888, importable and exportable
    pub fn new() -> Self {
        Self::with_modifiers(vec![ModifierProperties {
            modifier: DrmModifier::Linear,
            plane_count: 1,
            supports_disjoint: false,
        }])
    }

    pub fn with_modifiers(modifiers: Vec<ModifierProperties>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            modifiers: Mutex::new(modifiers),
            external: Mutex::new(ExternalImageFormatProperties {
                max_extent: Extent3D { width: 16384, height: 16384, depth: 1 },
                max_mip_levels: 1,
                max_array_layers: 1,
                sample_counts: 0x1,
                external_features: ExternalMemoryFeatures::IMPORTABLE | ExternalMemoryFeatures::EXPORTABLE,
            }),
            external_overrides: Mutex::new(FxHashMap::default()),
            fail_create_image: AtomicBool::new(false),
            fail_create_fence: AtomicBool::new(false),
            fail_bind: AtomicBool::new(false),
            wait_script: Mutex::new(VecDeque::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    pub fn calls(&self) -> Vec<DispatchCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&DispatchCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|call| pred(call)).count()
    }

    pub fn override_external(&self, modifier: DrmModifier, props: Option<ExternalImageFormatProperties>) {
        self.external_overrides.lock().unwrap().insert(u64::from(modifier), props);
    }

    fn next(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::SeqCst)
    }

    fn record(&self, call: DispatchCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl DeviceDispatch for MockDeviceDispatch {
    fn drm_format_modifier_properties(&self, _api_format: i32) -> Result<Vec<ModifierProperties>> {
        Ok(self.modifiers.lock().unwrap().clone())
    }

    fn external_image_format_properties(
        &self,
        _desc: &ImageDesc,
        modifier: DrmModifier,
        _compression: Option<&CompressionControl>,
    ) -> Result<ExternalImageFormatProperties> {
        match self.external_overrides.lock().unwrap().get(&u64::from(modifier)) {
            Some(Some(props)) => Ok(*props),
            Some(None) => Err(Error::FormatNotSupported(format!("{:?}", modifier))),
            None => Ok(*self.external.lock().unwrap()),
        }
    }

    fn create_image(&self, info: &ImageCreateInfo) -> Result<ImageHandle> {
        if self.fail_create_image.load(Ordering::SeqCst) {
            return Err(Error::OutOfHostMemory);
        }
        self.record(DispatchCall::CreateImage(info.clone()));
        Ok(ImageHandle(self.next()))
    }

    fn destroy_image(&self, image: ImageHandle) {
        self.record(DispatchCall::DestroyImage(image));
    }

    fn import_memory_fd(&self, _fd: BorrowedFd<'_>, _handle_type: ExternalMemoryHandleType) -> Result<MemoryHandle> {
        let memory = MemoryHandle(self.next());
        self.record(DispatchCall::ImportMemory(memory));
        Ok(memory)
    }

    fn bind_image_memory(&self, image: ImageHandle, bindings: &[MemoryBinding]) -> Result<()> {
        if self.fail_bind.load(Ordering::SeqCst) {
            return Err(Error::BackendError("vkBindImageMemory2 failed".to_string()));
        }
        self.record(DispatchCall::BindImageMemory { image, bindings: bindings.to_vec() });
        Ok(())
    }

    fn free_memory(&self, memory: MemoryHandle) {
        self.record(DispatchCall::FreeMemory(memory));
    }

    fn create_fence(&self) -> Result<FenceHandle> {
        if self.fail_create_fence.load(Ordering::SeqCst) {
            return Err(Error::BackendError("vkCreateFence failed".to_string()));
        }
        let fence = FenceHandle(self.next());
        self.record(DispatchCall::CreateFence(fence));
        Ok(fence)
    }

    fn reset_fence(&self, fence: FenceHandle) -> Result<()> {
        self.record(DispatchCall::ResetFence(fence));
        Ok(())
    }

    fn submit_fence_payload(
        &self,
        queue: QueueHandle,
        wait_semaphores: &[SemaphoreHandle],
        fence: FenceHandle,
    ) -> Result<()> {
        self.record(DispatchCall::SubmitFencePayload { queue, semaphores: wait_semaphores.to_vec(), fence });
        Ok(())
    }

    fn wait_fence(&self, fence: FenceHandle, _timeout: Duration) -> Result<()> {
        self.record(DispatchCall::WaitFence(fence));
        self.wait_script.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        self.record(DispatchCall::DestroyFence(fence));
    }
}

pub fn xrgb_desc(width: u32, height: u32) -> ImageDesc {
    ImageDesc {
        api_format: MOCK_API_FORMAT,
        fourcc: DrmFourcc::Xrgb8888,
        extent: Extent3D { width, height, depth: 1 },
        mip_levels: 1,
        array_layers: 1,
        samples: 0x1,
        usage: 0x10,
        flags: ImageCreateFlags::empty(),
        sharing_mode: SharingMode::Exclusive,
    }
}

// ============================================================================
// Mock allocator
// ============================================================================

/// Allocator double
///
/// Picks the first candidate format. Multi-plane formats get one buffer per
/// plane unless `disjoint` is false or the candidate is `NON_DISJOINT`.
pub struct MockAllocator {
    pub version: u32,
    pub fail_with: Option<AllocError>,
    pub disjoint: bool,
    pub requests: Arc<Mutex<Vec<(Vec<AllocFormat>, u32, u32, AllocateFlags)>>>,
}

impl MockAllocator {
    pub fn new() -> Self {
        Self {
            version: ALLOCATOR_INTERFACE_VERSION,
            fail_with: None,
            disjoint: false,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(err: AllocError) -> Self {
        Self { fail_with: Some(err), ..Self::new() }
    }
}

fn null_fd() -> Arc<OwnedFd> {
    Arc::new(OwnedFd::from(File::open("/dev/null").unwrap()))
}

impl BufferAllocator for MockAllocator {
    fn interface_version(&self) -> u32 {
        self.version
    }

    fn allocate(&self, info: &AllocateInfo<'_>) -> std::result::Result<AllocationResult, AllocError> {
        self.requests.lock().unwrap().push((info.formats.to_vec(), info.width, info.height, info.flags));
        if let Some(err) = self.fail_with {
            return Err(err);
        }
        let format = *info.formats.first().ok_or(AllocError::Invalid)?;

        let num_planes = (fourcc_plane_count(format.fourcc) as usize).min(MAX_FB_PLANES);
        let disjoint = self.disjoint
            && num_planes > 1
            && !format.flags.contains(crate::allocator::FormatFlags::NON_DISJOINT);

        let mut result = AllocationResult {
            format,
            average_row_strides: [0; MAX_FB_PLANES],
            offsets: [0; MAX_FB_PLANES],
            buffer_fds: Default::default(),
            is_disjoint: disjoint,
        };

        let luma = info.width.next_multiple_of(64);
        let mut offset = 0;
        let shared = (!info.flags.contains(AllocateFlags::NO_MEMORY)).then(null_fd);
        for plane in 0..num_planes {
            let bpp = if format.fourcc == DrmFourcc::Xrgb8888 || format.fourcc == DrmFourcc::Argb8888 { 4 } else { 1 };
            result.average_row_strides[plane] = luma * bpp;
            if !disjoint {
                result.offsets[plane] = offset;
                offset += luma * bpp * info.height;
            }
            if !info.flags.contains(AllocateFlags::NO_MEMORY) {
                result.buffer_fds[plane] = if disjoint { Some(null_fd()) } else { shared.clone() };
            }
        }
        Ok(result)
    }
}
