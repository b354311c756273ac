use lora_arq_abstract::RadioConfig;

/// Chirp-spread-spectrum time on air, in milliseconds, for `payload_len` bytes.
///
/// Instrumentation only: nothing in the protocol depends on this value.
pub fn time_on_air_ms(radio: &RadioConfig, payload_len: usize) -> f64 {
    let sf = f64::from(radio.spreading_factor);
    let bw = f64::from(radio.bandwidth_hz);
    let crc = if radio.crc { 1.0 } else { 0.0 };
    let implicit_header = if radio.explicit_header { 0.0 } else { 1.0 };
    let de = if radio.low_data_rate_optimize() { 1.0 } else { 0.0 };
    let cr = f64::from(radio.coding_rate_denominator.saturating_sub(4));

    let symbol_s = 2f64.powf(sf) / bw;
    let preamble_s = (f64::from(radio.preamble_symbols) + 4.25) * symbol_s;

    let numerator =
        8.0 * payload_len as f64 - 4.0 * sf + 28.0 + 16.0 * crc - 20.0 * implicit_header;
    let denominator = 4.0 * (sf - 2.0 * de);
    let payload_symbols = 8.0 + ((numerator / denominator).ceil() * (cr + 4.0)).max(0.0);

    (preamble_s + payload_symbols * symbol_s) * 1000.0
}
