use anyhow::Context;
use windows::Win32::Graphics::Direct3D11::{
    D3D11_CPU_ACCESS_READ, D3D11_MAP_READ, D3D11_MAPPED_SUBRESOURCE, D3D11_TEXTURE2D_DESC,
    D3D11_USAGE_STAGING, ID3D11Device, ID3D11DeviceContext, ID3D11Resource, ID3D11Texture2D,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_FORMAT, DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_FORMAT_B8G8R8A8_UNORM_SRGB, DXGI_SAMPLE_DESC,
};
use windows::core::Interface;

use crate::error::{CaptureError, CaptureResult};
use crate::frame::RawFrame;

/// Only 8-bit BGRA desktop surfaces can be copied straight into a
/// [`RawFrame`].
pub(crate) fn ensure_bgra_format(format: DXGI_FORMAT) -> CaptureResult<()> {
    match format {
        DXGI_FORMAT_B8G8R8A8_UNORM | DXGI_FORMAT_B8G8R8A8_UNORM_SRGB => Ok(()),
        other => Err(CaptureError::UnsupportedFormat(format!(
            "desktop surface format {other:?} is not 8-bit BGRA"
        ))),
    }
}

/// Return the cached staging texture when it already has the requested
/// size and format, otherwise replace it with a new one.
pub(crate) fn ensure_staging_texture(
    device: &ID3D11Device,
    staging: &mut Option<ID3D11Texture2D>,
    width: u32,
    height: u32,
    format: DXGI_FORMAT,
) -> CaptureResult<ID3D11Texture2D> {
    if let Some(existing) = staging.as_ref() {
        let mut desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { existing.GetDesc(&mut desc) };
        if desc.Width == width && desc.Height == height && desc.Format == format {
            return Ok(existing.clone());
        }
    }

    let desc = D3D11_TEXTURE2D_DESC {
        Width: width,
        Height: height,
        MipLevels: 1,
        ArraySize: 1,
        Format: format,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        Usage: D3D11_USAGE_STAGING,
        BindFlags: Default::default(),
        CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
        MiscFlags: Default::default(),
    };

    let mut texture: Option<ID3D11Texture2D> = None;
    unsafe { device.CreateTexture2D(&desc, None, Some(&mut texture)) }
        .context("CreateTexture2D for region staging failed")
        .map_err(CaptureError::Platform)?;
    let texture = texture
        .context("CreateTexture2D did not return a staging texture")
        .map_err(CaptureError::Platform)?;
    *staging = Some(texture.clone());
    Ok(texture)
}

/// Unmaps the staging resource when dropped.
struct MappedStaging<'a> {
    context: &'a ID3D11DeviceContext,
    resource: &'a ID3D11Resource,
    mapped: D3D11_MAPPED_SUBRESOURCE,
}

impl<'a> MappedStaging<'a> {
    fn map(context: &'a ID3D11DeviceContext, resource: &'a ID3D11Resource) -> CaptureResult<Self> {
        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        // Try a non-blocking map first; the copy has usually finished by
        // the time we get here.
        // D3D11_MAP_FLAG_DO_NOT_WAIT = 0x100000
        const DO_NOT_WAIT: u32 = 0x100000;
        let non_blocking =
            unsafe { context.Map(resource, 0, D3D11_MAP_READ, DO_NOT_WAIT, Some(&mut mapped)) };
        if non_blocking.is_err() {
            mapped = D3D11_MAPPED_SUBRESOURCE::default();
            unsafe { context.Map(resource, 0, D3D11_MAP_READ, 0, Some(&mut mapped)) }
                .context("failed to map region staging texture")
                .map_err(CaptureError::Platform)?;
        }
        Ok(Self {
            context,
            resource,
            mapped,
        })
    }
}

impl Drop for MappedStaging<'_> {
    fn drop(&mut self) {
        unsafe { self.context.Unmap(self.resource, 0) };
    }
}

/// Map `staging` and copy it row by row into `frame`, honoring the
/// driver's row pitch.
pub(crate) fn read_staging_into_frame(
    context: &ID3D11DeviceContext,
    staging: &ID3D11Texture2D,
    frame: &mut RawFrame,
) -> CaptureResult<()> {
    let resource = staging
        .cast::<ID3D11Resource>()
        .context("failed to cast staging texture to ID3D11Resource")
        .map_err(CaptureError::Platform)?;
    let map = MappedStaging::map(context, &resource)?;

    let row_len = frame.stride();
    let height = frame.height() as usize;
    let src_pitch = map.mapped.RowPitch as usize;
    if map.mapped.pData.is_null() || src_pitch < row_len {
        return Err(CaptureError::Platform(anyhow::anyhow!(
            "mapped staging texture has row pitch {src_pitch}, need at least {row_len}"
        )));
    }

    let src_base = map.mapped.pData as *const u8;
    for (row, dst) in frame
        .as_mut_bgra_bytes()
        .chunks_exact_mut(row_len)
        .take(height)
        .enumerate()
    {
        // SAFETY: the mapping covers `height` rows of `RowPitch` bytes and
        // `row_len <= RowPitch` was checked above.
        let src = unsafe { std::slice::from_raw_parts(src_base.add(row * src_pitch), row_len) };
        dst.copy_from_slice(src);
    }
    Ok(())
}
