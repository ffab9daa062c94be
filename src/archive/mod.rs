// Archive extraction: zip parsing with on-demand entry decompression.

pub mod extractor;
