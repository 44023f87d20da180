use crate::{common::*, dataset::denormalize};

/// Converts one normalized `[3, h, w]` tensor into an RGB image.
pub fn tensor_to_image(xs: &Tensor) -> Fallible<RgbImage> {
    let (_c, height, width) = xs.size3()?;
    let pixels = (denormalize(xs) * 255.0)
        .round()
        .to_kind(Kind::Uint8)
        .permute([1, 2, 0])
        .contiguous()
        .to_device(Device::Cpu)
        .reshape([-1]);
    let data = Vec::<u8>::try_from(&pixels)?;

    RgbImage::from_raw(width as u32, height as u32, data)
        .ok_or_else(|| format_err!("tensor of size {:?} is not an image", xs.size()))
}

/// Renders one row of `style | content | output` per sample, at most `capacity` rows.
pub fn render_preview(
    style: &Tensor,
    content: &Tensor,
    output: &Tensor,
    capacity: usize,
) -> Fallible<RgbImage> {
    ensure!(
        style.size() == content.size() && content.size() == output.size(),
        "preview tensors differ in shape: {:?}, {:?}, {:?}",
        style.size(),
        content.size(),
        output.size()
    );
    let (batch_size, _c, height, width) = style.size4()?;
    let rows = (batch_size as usize).min(capacity);
    ensure!(rows > 0, "nothing to preview");

    let (tile_width, tile_height) = (width as u32, height as u32);
    let mut canvas = RgbImage::new(tile_width * 3, tile_height * rows as u32);

    for row in 0..rows {
        let index = row as i64;
        let y = tile_height * row as u32;
        for (column, batch) in [style, content, output].into_iter().enumerate() {
            let tile = tensor_to_image(&batch.select(0, index))?;
            canvas.copy_from(&tile, tile_width * column as u32, y)?;
        }
    }

    Ok(canvas)
}

pub fn preview_path<P>(dir: P, iteration: usize) -> PathBuf
where
    P: AsRef<Path>,
{
    dir.as_ref().join(format!("{}_preview.png", iteration))
}
