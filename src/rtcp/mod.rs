pub mod rtcp_fb_nack;
pub mod rtcp_fb_tcc;
pub mod tcc;
