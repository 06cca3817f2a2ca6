use anyhow::Context;
use windows::Win32::Foundation::RECT;
use windows::Win32::Graphics::Direct3D11::{
    D3D11_BOX, D3D11_TEXTURE2D_DESC, ID3D11Device, ID3D11DeviceContext, ID3D11Resource,
    ID3D11Texture2D,
};
use windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT_B8G8R8A8_UNORM;
use windows::Win32::Graphics::Dxgi::{
    CreateDXGIFactory1, DXGI_ERROR_ACCESS_LOST, DXGI_ERROR_NOT_FOUND, DXGI_ERROR_WAIT_TIMEOUT,
    DXGI_OUTDUPL_FRAME_INFO, IDXGIAdapter, IDXGIFactory1, IDXGIOutput, IDXGIOutput1,
    IDXGIOutputDuplication, IDXGIResource,
};
use windows::core::Interface;

use crate::backend::Compositor;
use crate::error::{CaptureError, CaptureResult};
use crate::frame::RawFrame;
use crate::region::{CaptureRegion, SurfaceBox};

use super::{d3d11, surface};

/// Desktop output chosen for a capture region.
struct SelectedOutput {
    adapter: IDXGIAdapter,
    output: IDXGIOutput,
    bounds: RECT,
}

/// DXGI desktop duplication of the output that holds the capture region.
pub(crate) struct DxgiCompositor {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    output: IDXGIOutput,
    duplication: IDXGIOutputDuplication,
    origin: (i32, i32),
    staging: Option<ID3D11Texture2D>,
}

// SAFETY: the device is created single-threaded and every interface here
// is only used by whichever thread currently owns the compositor.
unsafe impl Send for DxgiCompositor {}

impl DxgiCompositor {
    /// Duplicate the output whose desktop bounds contain the region's
    /// top-left corner, or the first attached output when none does.
    pub(crate) fn for_region(region: &CaptureRegion) -> CaptureResult<Self> {
        let selected = select_output(region)?;
        let (device, context) = d3d11::create_device_for_adapter(&selected.adapter)
            .map_err(CaptureError::Platform)?;
        let duplication = create_duplication(&selected.output, &device)?;
        let origin = (selected.bounds.left, selected.bounds.top);

        tracing::info!(
            output_left = selected.bounds.left,
            output_top = selected.bounds.top,
            output_right = selected.bounds.right,
            output_bottom = selected.bounds.bottom,
            "desktop duplication initialized"
        );

        Ok(Self {
            device,
            context,
            output: selected.output,
            duplication,
            origin,
            staging: None,
        })
    }
}

fn select_output(region: &CaptureRegion) -> CaptureResult<SelectedOutput> {
    let factory: IDXGIFactory1 = unsafe { CreateDXGIFactory1() }
        .context("CreateDXGIFactory1 failed")
        .map_err(CaptureError::Platform)?;

    let mut fallback: Option<SelectedOutput> = None;
    let mut adapter_idx = 0u32;
    loop {
        let adapter1 = match unsafe { factory.EnumAdapters1(adapter_idx) } {
            Ok(adapter) => adapter,
            Err(e) if e.code() == DXGI_ERROR_NOT_FOUND => break,
            Err(e) => {
                return Err(CaptureError::Platform(
                    anyhow::Error::from(e).context(format!("EnumAdapters1({adapter_idx}) failed")),
                ));
            }
        };
        let adapter: IDXGIAdapter = adapter1
            .cast()
            .context("failed to query IDXGIAdapter")
            .map_err(CaptureError::Platform)?;

        let mut output_idx = 0u32;
        loop {
            let output = match unsafe { adapter.EnumOutputs(output_idx) } {
                Ok(output) => output,
                Err(e) if e.code() == DXGI_ERROR_NOT_FOUND => break,
                Err(e) => {
                    return Err(CaptureError::Platform(anyhow::Error::from(e).context(
                        format!("EnumOutputs({output_idx}) on adapter {adapter_idx} failed"),
                    )));
                }
            };
            output_idx += 1;

            let desc = unsafe { output.GetDesc() }
                .context("IDXGIOutput::GetDesc failed")
                .map_err(CaptureError::Platform)?;
            if !desc.AttachedToDesktop.as_bool() {
                continue;
            }

            let bounds = desc.DesktopCoordinates;
            let candidate = SelectedOutput {
                adapter: adapter.clone(),
                output,
                bounds,
            };
            if contains_point(&bounds, region.x, region.y) {
                return Ok(candidate);
            }
            if fallback.is_none() {
                fallback = Some(candidate);
            }
        }
        adapter_idx += 1;
    }

    match fallback {
        Some(selected) => {
            tracing::warn!(
                region_x = region.x,
                region_y = region.y,
                "no output contains the capture region, using the first attached output"
            );
            Ok(selected)
        }
        None => Err(CaptureError::BackendUnavailable(
            "no desktop-attached DXGI output found".to_string(),
        )),
    }
}

fn contains_point(bounds: &RECT, x: i32, y: i32) -> bool {
    x >= bounds.left && x < bounds.right && y >= bounds.top && y < bounds.bottom
}

fn create_duplication(
    output: &IDXGIOutput,
    device: &ID3D11Device,
) -> CaptureResult<IDXGIOutputDuplication> {
    let output1: IDXGIOutput1 = output
        .cast()
        .context("failed to query IDXGIOutput1")
        .map_err(CaptureError::Platform)?;
    unsafe { output1.DuplicateOutput(device) }
        .context("DuplicateOutput failed")
        .map_err(CaptureError::Platform)
}

fn map_duplication_error(error: windows::core::Error, context: &'static str) -> CaptureError {
    if error.code() == DXGI_ERROR_ACCESS_LOST {
        return CaptureError::AccessLost;
    }
    CaptureError::Platform(anyhow::Error::from(error).context(context))
}

impl Compositor for DxgiCompositor {
    type Surface = ID3D11Texture2D;
    type Staging = ID3D11Texture2D;

    fn acquire_next_frame(&mut self) -> CaptureResult<Option<ID3D11Texture2D>> {
        let mut info = DXGI_OUTDUPL_FRAME_INFO::default();
        let mut resource: Option<IDXGIResource> = None;
        let acquired = unsafe { self.duplication.AcquireNextFrame(0, &mut info, &mut resource) };
        if let Err(error) = acquired {
            if error.code() == DXGI_ERROR_WAIT_TIMEOUT {
                return Ok(None);
            }
            return Err(map_duplication_error(error, "AcquireNextFrame failed"));
        }

        let Some(resource) = resource else {
            unsafe { self.duplication.ReleaseFrame() }.ok();
            return Ok(None);
        };

        match resource.cast::<ID3D11Texture2D>() {
            Ok(texture) => Ok(Some(texture)),
            Err(error) => {
                drop(resource);
                unsafe { self.duplication.ReleaseFrame() }.ok();
                Err(CaptureError::Platform(
                    anyhow::Error::from(error)
                        .context("failed to cast acquired IDXGIResource to ID3D11Texture2D"),
                ))
            }
        }
    }

    fn release_frame(&mut self) -> CaptureResult<()> {
        unsafe { self.duplication.ReleaseFrame() }
            .map_err(|error| map_duplication_error(error, "ReleaseFrame failed"))
    }

    fn surface_size(&self, surface: &ID3D11Texture2D) -> CaptureResult<(u32, u32)> {
        let mut desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { surface.GetDesc(&mut desc) };
        surface::ensure_bgra_format(desc.Format)?;
        Ok((desc.Width, desc.Height))
    }

    fn desktop_origin(&self) -> (i32, i32) {
        self.origin
    }

    fn create_staging(&mut self, width: u32, height: u32) -> CaptureResult<ID3D11Texture2D> {
        surface::ensure_staging_texture(
            &self.device,
            &mut self.staging,
            width,
            height,
            DXGI_FORMAT_B8G8R8A8_UNORM,
        )
    }

    fn copy_region(
        &mut self,
        surface: &ID3D11Texture2D,
        staging: &ID3D11Texture2D,
        area: &SurfaceBox,
    ) -> CaptureResult<()> {
        let source_resource: ID3D11Resource = surface
            .cast()
            .context("failed to cast desktop texture to ID3D11Resource")
            .map_err(CaptureError::Platform)?;
        let staging_resource: ID3D11Resource = staging
            .cast()
            .context("failed to cast staging texture to ID3D11Resource")
            .map_err(CaptureError::Platform)?;
        let source_box = D3D11_BOX {
            left: area.left,
            top: area.top,
            front: 0,
            right: area.right,
            bottom: area.bottom,
            back: 1,
        };
        unsafe {
            self.context.CopySubresourceRegion(
                &staging_resource,
                0,
                0,
                0,
                0,
                &source_resource,
                0,
                Some(&source_box),
            );
        }
        Ok(())
    }

    fn read_staging(&mut self, staging: &ID3D11Texture2D, frame: &mut RawFrame) -> CaptureResult<()> {
        surface::read_staging_into_frame(&self.context, staging, frame)
    }

    fn recover(&mut self) -> CaptureResult<()> {
        self.staging = None;
        self.duplication = create_duplication(&self.output, &self.device)?;
        let desc = unsafe { self.output.GetDesc() }
            .context("IDXGIOutput::GetDesc failed")
            .map_err(CaptureError::Platform)?;
        self.origin = (desc.DesktopCoordinates.left, desc.DesktopCoordinates.top);
        tracing::info!(
            origin_x = self.origin.0,
            origin_y = self.origin.1,
            "desktop duplication recreated"
        );
        Ok(())
    }
}
