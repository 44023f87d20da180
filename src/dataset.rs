use crate::{common::*, model::params};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// A batch of style images and content images, both `[batch, 3, h, w]`, normalized.
#[derive(Debug)]
pub struct StyleContentBatch {
    pub style: Tensor,
    pub content: Tensor,
}

/// Source of training batches. Implementations never block indefinitely.
pub trait BatchSource {
    fn get(&mut self) -> Fallible<StyleContentBatch>;

    /// Reorders the underlying style images before the next draw.
    fn reshuffle(&mut self) {}
}

/// Style and content image files, paired by index.
#[derive(Debug, Clone)]
pub struct StyleContentDataset {
    style_paths: Vec<PathBuf>,
    content_paths: Vec<PathBuf>,
    image_size: u32,
}

impl StyleContentDataset {
    pub fn open<S, C>(style_dir: S, content_dir: C, image_size: u32) -> Fallible<Self>
    where
        S: AsRef<Path>,
        C: AsRef<Path>,
    {
        ensure!(image_size > 0, "image_size must be positive");
        let style_paths = list_images(style_dir.as_ref())?;
        let content_paths = list_images(content_dir.as_ref())?;
        info!(
            "found {} style images and {} content images",
            style_paths.len(),
            content_paths.len()
        );

        Ok(Self {
            style_paths,
            content_paths,
            image_size,
        })
    }

    pub fn len(&self) -> usize {
        self.style_paths.len().max(self.content_paths.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn image_size(&self) -> u32 {
        self.image_size
    }

    pub fn shuffle_styles<R>(&mut self, rng: &mut R)
    where
        R: Rng,
    {
        self.style_paths.shuffle(rng);
    }

    /// Loads the `index`-th (style, content) pair as `[3, size, size]` normalized tensors.
    pub fn load_pair<R>(&self, index: usize, rng: &mut R) -> Fallible<(Tensor, Tensor)>
    where
        R: Rng,
    {
        let style_path = &self.style_paths[index % self.style_paths.len()];
        let content_path = &self.content_paths[index % self.content_paths.len()];
        let style = load_image(style_path, self.image_size, rng)?;
        let content = load_image(content_path, self.image_size, rng)?;
        Ok((style, content))
    }
}

/// Draws fixed-size batches from a [StyleContentDataset], cycling through it forever.
#[derive(Debug)]
pub struct DataStore {
    dataset: StyleContentDataset,
    batch_size: usize,
    shuffle: bool,
    order: Vec<usize>,
    cursor: usize,
    rng: StdRng,
    device: Device,
}

impl DataStore {
    pub fn new(
        dataset: StyleContentDataset,
        batch_size: usize,
        shuffle: bool,
        device: Device,
        seed: Option<u64>,
    ) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut order = (0..dataset.len()).collect::<Vec<_>>();
        if shuffle {
            order.shuffle(&mut rng);
        }

        Self {
            dataset,
            batch_size,
            shuffle,
            order,
            cursor: 0,
            rng,
            device,
        }
    }

    pub fn dataset(&self) -> &StyleContentDataset {
        &self.dataset
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn next_index(&mut self) -> usize {
        if self.cursor == self.order.len() {
            self.cursor = 0;
            if self.shuffle {
                self.order.shuffle(&mut self.rng);
            }
        }
        let index = self.order[self.cursor];
        self.cursor += 1;
        index
    }
}

impl BatchSource for DataStore {
    fn get(&mut self) -> Fallible<StyleContentBatch> {
        let indices = (0..self.batch_size)
            .map(|_| self.next_index())
            .collect::<Vec<_>>();
        let seeds = indices
            .iter()
            .map(|_| self.rng.gen::<u64>())
            .collect::<Vec<_>>();

        let dataset = &self.dataset;
        let pairs = indices
            .par_iter()
            .zip(seeds.par_iter())
            .map(|(&index, &seed)| dataset.load_pair(index, &mut StdRng::seed_from_u64(seed)))
            .collect::<Fallible<Vec<_>>>()?;
        let (styles, contents): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();

        Ok(StyleContentBatch {
            style: Tensor::stack(&styles, 0).to_device(self.device),
            content: Tensor::stack(&contents, 0).to_device(self.device),
        })
    }

    fn reshuffle(&mut self) {
        self.dataset.shuffle_styles(&mut self.rng);
    }
}

fn list_images(dir: &Path) -> Fallible<Vec<PathBuf>> {
    ensure!(dir.is_dir(), "{} is not a directory", dir.display());

    let mut paths = IMAGE_EXTENSIONS
        .iter()
        .flat_map(|ext| [ext.to_string(), ext.to_uppercase()])
        .map(|ext| {
            let pattern = dir.join(format!("*.{}", ext));
            let pattern = pattern
                .to_str()
                .ok_or_else(|| format_err!("non-utf8 path {}", dir.display()))?;
            let paths = glob::glob(pattern)?.collect::<Result<Vec<_>, _>>()?;
            Fallible::Ok(paths)
        })
        .flatten_ok()
        .collect::<Fallible<Vec<_>>>()?;
    paths.sort();
    paths.dedup();

    ensure!(!paths.is_empty(), "no images found in {}", dir.display());
    Ok(paths)
}

/// Resizes the short side to `size`, takes a random `size`x`size` crop and normalizes it.
pub fn load_image<P, R>(path: P, size: u32, rng: &mut R) -> Fallible<Tensor>
where
    P: AsRef<Path>,
    R: Rng,
{
    let path = path.as_ref();
    let image = image::open(path).with_context(|| format!("failed to decode {}", path.display()))?;
    let image = random_crop(&resize_short_side(&image, size), size, rng);
    Ok(normalize(&image_to_tensor(&image.to_rgb8())))
}

fn resize_short_side(image: &DynamicImage, size: u32) -> DynamicImage {
    let (width, height) = image.dimensions();
    let scale = size as f64 / width.min(height) as f64;
    let new_width = ((width as f64 * scale).round() as u32).max(size);
    let new_height = ((height as f64 * scale).round() as u32).max(size);
    image.resize_exact(new_width, new_height, FilterType::Triangle)
}

fn random_crop<R>(image: &DynamicImage, size: u32, rng: &mut R) -> DynamicImage
where
    R: Rng,
{
    let (width, height) = image.dimensions();
    let x = rng.gen_range(0..=(width - size));
    let y = rng.gen_range(0..=(height - size));
    image.crop_imm(x, y, size, size)
}

/// `[3, h, w]` float tensor in `[0, 1]`.
pub fn image_to_tensor(image: &RgbImage) -> Tensor {
    let (width, height) = image.dimensions();
    Tensor::from_slice(image.as_raw())
        .view([height as i64, width as i64, params::IMAGE_CHANNELS])
        .permute([2, 0, 1])
        .to_kind(Kind::Float)
        / 255.0
}

fn channel_tensor(values: [f32; 3], device: Device) -> Tensor {
    Tensor::from_slice(&values)
        .view([params::IMAGE_CHANNELS, 1, 1])
        .to_device(device)
}

/// Maps `[0, 1]` pixels to ImageNet-normalized values. Accepts `[3, h, w]` or `[b, 3, h, w]`.
pub fn normalize(xs: &Tensor) -> Tensor {
    let mean = channel_tensor(params::IMAGENET_MEAN, xs.device());
    let std = channel_tensor(params::IMAGENET_STD, xs.device());
    (xs - mean) / std
}

/// Inverse of [normalize], clamped to `[0, 1]`.
pub fn denormalize(xs: &Tensor) -> Tensor {
    let mean = channel_tensor(params::IMAGENET_MEAN, xs.device());
    let std = channel_tensor(params::IMAGENET_STD, xs.device());
    (xs * std + mean).clamp(0.0, 1.0)
}
