// input images
pub const IMAGE_CHANNELS: i64 = 3;
pub const IMAGE_SIZE: u32 = 256;
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

// encoder: vgg19.features[..21]
pub const ENCODER_DEPTH: usize = 21;
pub const TAP_LAYERS: [usize; 4] = [1, 6, 11, 20]; // relu1_1, relu2_1, relu3_1, relu4_1
pub const FEATURE_CHANNELS: i64 = 512; // channels of relu4_1
pub const FEATURE_STRIDE: i64 = 8; // three max-pools before relu4_1

// adain
pub const ADAIN_EPS: f64 = 1e-5;
pub const SPATIAL_DIMS: [i64; 2] = [2, 3];

// hyper-parameters: optimization
pub const LEARNING_RATE: f64 = 1e-4;
pub const MAX_ITER: usize = 80000;
pub const BATCH_SIZE: usize = 8;
pub const LOGGING_INTERVAL: usize = 100;
pub const PREVIEW_INTERVAL: usize = 1000;
pub const PREVIEW_CAPACITY: usize = 16; // 8x6 subplot grid of triplets
