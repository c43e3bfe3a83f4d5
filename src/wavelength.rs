//! Wavelength and photon-energy conversion for both laser channels.
//!
//! The experiment works with two pulsed lasers. The detachment dye laser has
//! four optical setups (standard, frequency doubled, H₂ Raman shifted, and
//! difference-frequency IR generation); the excitation OPO/A reaches four
//! infrared regimes (nIR, iIR, mIR, fIR) from its tunable near-IR output via
//! fixed nonlinear mixing relations against the Nd:YAG pump. Each channel's
//! energy set keeps every regime's wavelength (nm) and wavenumber (cm⁻¹)
//! mutually consistent: mutating one regime recomputes all siblings through
//! the tunable/standard wavenumber.
//!
//! Calibration constants (YAG fundamental, H₂ Raman shift) are injected per
//! instance so tests and multi-rig configurations can carry their own values.

/// nm·cm⁻¹ product used for all wavelength/wavenumber conversions.
const NM_WAVENUMBER_PRODUCT: f64 = 1e7;

/// Infrared regime reachable by the excitation OPO/A.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExcitationMode {
    /// Near infrared: the OPO's direct tunable output.
    Nir,
    /// Intermediate infrared.
    Iir,
    /// Mid infrared.
    Mir,
    /// Far infrared.
    Fir,
}

impl ExcitationMode {
    /// Short display label (e.g. `"nIR"`).
    pub fn label(&self) -> &'static str {
        match self {
            ExcitationMode::Nir => "nIR",
            ExcitationMode::Iir => "iIR",
            ExcitationMode::Mir => "mIR",
            ExcitationMode::Fir => "fIR",
        }
    }
}

/// Optical setup of the detachment dye laser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetachmentMode {
    /// Standard dye laser output.
    Standard,
    /// Frequency doubled output.
    Doubled,
    /// H₂ Raman shifted output.
    Raman,
    /// Difference-frequency generation against the YAG fundamental.
    Irdfg,
}

impl DetachmentMode {
    /// Short display label.
    pub fn label(&self) -> &'static str {
        match self {
            DetachmentMode::Standard => "Standard",
            DetachmentMode::Doubled => "Doubled",
            DetachmentMode::Raman => "Raman",
            DetachmentMode::Irdfg => "IRDFG",
        }
    }
}

/// A photon energy held simultaneously as wavelength and wavenumber.
///
/// The zero value means "unknown / not set" and is used as the null energy
/// throughout the crate.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Energy {
    wavelength: f64,
    wavenumber: f64,
}

impl Energy {
    /// The null energy.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Energy from a wavelength in nm. Zero maps to the null energy.
    pub fn from_wavelength(nm: f64) -> Self {
        if nm == 0.0 {
            Self::zero()
        } else {
            Self {
                wavelength: nm,
                wavenumber: NM_WAVENUMBER_PRODUCT / nm,
            }
        }
    }

    /// Energy from a wavenumber in cm⁻¹. Zero maps to the null energy.
    pub fn from_wavenumber(wn: f64) -> Self {
        if wn == 0.0 {
            Self::zero()
        } else {
            Self {
                wavelength: NM_WAVENUMBER_PRODUCT / wn,
                wavenumber: wn,
            }
        }
    }

    /// Wavelength in nm (0 when unset).
    pub fn wavelength(&self) -> f64 {
        self.wavelength
    }

    /// Wavenumber in cm⁻¹ (0 when unset).
    pub fn wavenumber(&self) -> f64 {
        self.wavenumber
    }

    /// Whether this is the null energy.
    pub fn is_zero(&self) -> bool {
        self.wavelength == 0.0 && self.wavenumber == 0.0
    }
}

/// Calibration constants anchoring the regime conversions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationConstants {
    yag_wavelength: f64,
    h2_raman_shift: f64,
}

impl CalibrationConstants {
    /// Default H₂ Raman shift in cm⁻¹.
    pub const DEFAULT_H2_RAMAN_SHIFT: f64 = 4055.201;
    /// Default Nd:YAG fundamental wavelength in nm.
    pub const DEFAULT_YAG_WAVELENGTH: f64 = 1064.0;

    /// Build constants from a YAG fundamental (nm) and H₂ shift (cm⁻¹).
    pub fn new(yag_wavelength_nm: f64, h2_raman_shift_wn: f64) -> Self {
        Self {
            yag_wavelength: yag_wavelength_nm,
            h2_raman_shift: h2_raman_shift_wn,
        }
    }

    /// YAG fundamental wavelength in nm.
    pub fn yag_wavelength(&self) -> f64 {
        self.yag_wavelength
    }

    /// YAG fundamental wavenumber in cm⁻¹.
    pub fn yag_wavenumber(&self) -> f64 {
        NM_WAVENUMBER_PRODUCT / self.yag_wavelength
    }

    /// H₂ Raman shift in cm⁻¹.
    pub fn h2_wavenumber(&self) -> f64 {
        self.h2_raman_shift
    }
}

impl Default for CalibrationConstants {
    fn default() -> Self {
        Self::new(Self::DEFAULT_YAG_WAVELENGTH, Self::DEFAULT_H2_RAMAN_SHIFT)
    }
}

/// A desired energy given in exactly one unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EnergyInput {
    /// Wavelength in nm.
    Wavelength(f64),
    /// Wavenumber in cm⁻¹.
    Wavenumber(f64),
}

impl EnergyInput {
    fn wavenumber(self) -> f64 {
        match self {
            EnergyInput::Wavelength(nm) if nm != 0.0 => NM_WAVENUMBER_PRODUCT / nm,
            EnergyInput::Wavelength(_) => 0.0,
            EnergyInput::Wavenumber(wn) => wn,
        }
    }
}

/// Excitation-channel energy set: one [`Energy`] per IR regime plus the
/// currently selected regime.
#[derive(Debug, Clone, PartialEq)]
pub struct ExcitationWavelength {
    constants: CalibrationConstants,
    nir: Energy,
    iir: Energy,
    mir: Energy,
    fir: Energy,
    selected_mode: Option<ExcitationMode>,
}

impl ExcitationWavelength {
    /// New energy set with all regimes unset and nIR selected.
    pub fn new(constants: CalibrationConstants) -> Self {
        Self {
            constants,
            nir: Energy::zero(),
            iir: Energy::zero(),
            mir: Energy::zero(),
            fir: Energy::zero(),
            selected_mode: Some(ExcitationMode::Nir),
        }
    }

    /// Currently selected regime (`None` = unknown/unattainable).
    pub fn selected_mode(&self) -> Option<ExcitationMode> {
        self.selected_mode
    }

    pub fn set_selected_mode(&mut self, mode: Option<ExcitationMode>) {
        self.selected_mode = mode;
    }

    /// Energy of the selected regime (null energy when no regime selected).
    pub fn energy(&self) -> Energy {
        self.selected_mode
            .map_or(Energy::zero(), |mode| self.energy_of(mode))
    }

    /// Energy of a specific regime.
    pub fn energy_of(&self, mode: ExcitationMode) -> Energy {
        match mode {
            ExcitationMode::Nir => self.nir,
            ExcitationMode::Iir => self.iir,
            ExcitationMode::Mir => self.mir,
            ExcitationMode::Fir => self.fir,
        }
    }

    pub fn nir(&self) -> Energy {
        self.nir
    }

    pub fn iir(&self) -> Energy {
        self.iir
    }

    pub fn mir(&self) -> Energy {
        self.mir
    }

    pub fn fir(&self) -> Energy {
        self.fir
    }

    /// Reset every regime to the null energy (selected mode is untouched).
    pub fn reset(&mut self) {
        self.nir = Energy::zero();
        self.iir = Energy::zero();
        self.mir = Energy::zero();
        self.fir = Energy::zero();
    }

    /// Set one regime's wavelength (nm) and recompute all siblings.
    ///
    /// A zero value resets the whole set, signalling "unknown".
    pub fn set_wavelength(&mut self, mode: ExcitationMode, nm: f64) {
        if nm == 0.0 {
            self.reset();
        } else {
            self.store(mode, Energy::from_wavelength(nm));
            self.convert_from(mode);
        }
    }

    /// Set one regime's wavenumber (cm⁻¹) and recompute all siblings.
    pub fn set_wavenumber(&mut self, mode: ExcitationMode, wn: f64) {
        if wn == 0.0 {
            self.reset();
        } else {
            self.store(mode, Energy::from_wavenumber(wn));
            self.convert_from(mode);
        }
    }

    /// Classify a desired energy into its IR regime and populate the set.
    ///
    /// Returns the regime needed to reach the energy, or `None` if the energy
    /// falls outside every reachable band (the caller must treat that as
    /// "unattainable"). All band bounds are strictly exclusive, so a
    /// wavenumber exactly on a boundary (e.g. 4500 cm⁻¹) classifies into no
    /// regime.
    pub fn get_nir(&mut self, input: EnergyInput) -> Option<ExcitationMode> {
        let wn = input.wavenumber();
        if wn == 0.0 {
            self.selected_mode = None;
            return None;
        }

        self.selected_mode = if 11355.0 < wn && wn < 14080.0 {
            self.set_wavenumber(ExcitationMode::Nir, wn);
            Some(ExcitationMode::Nir)
        } else if 4500.0 < wn && wn < 7400.0 {
            self.set_wavenumber(ExcitationMode::Iir, wn);
            Some(ExcitationMode::Iir)
        } else if 2000.0 < wn && wn < 4500.0 {
            self.set_wavenumber(ExcitationMode::Mir, wn);
            Some(ExcitationMode::Mir)
        } else if 625.0 < wn && wn < 2000.0 {
            self.set_wavenumber(ExcitationMode::Fir, wn);
            Some(ExcitationMode::Fir)
        } else {
            None
        };
        self.selected_mode
    }

    fn store(&mut self, mode: ExcitationMode, energy: Energy) {
        match mode {
            ExcitationMode::Nir => self.nir = energy,
            ExcitationMode::Iir => self.iir = energy,
            ExcitationMode::Mir => self.mir = energy,
            ExcitationMode::Fir => self.fir = energy,
        }
    }

    /// Recompute the three sibling regimes from the one just written.
    fn convert_from(&mut self, mode: ExcitationMode) {
        let yag = self.constants.yag_wavenumber();
        let wn = self.energy_of(mode).wavenumber();
        match mode {
            ExcitationMode::Nir => {
                self.iir = Energy::from_wavenumber(2.0 * yag - wn);
                self.mir = Energy::from_wavenumber(wn - yag);
                self.fir = Energy::from_wavenumber(3.0 * yag - 2.0 * wn);
            }
            ExcitationMode::Iir => {
                self.nir = Energy::from_wavenumber(2.0 * yag - wn);
                self.mir = Energy::from_wavenumber(yag - wn);
                self.fir = Energy::from_wavenumber(2.0 * wn - yag);
            }
            ExcitationMode::Mir => {
                self.nir = Energy::from_wavenumber(yag + wn);
                self.iir = Energy::from_wavenumber(yag - wn);
                self.fir = Energy::from_wavenumber(yag - 2.0 * wn);
            }
            ExcitationMode::Fir => {
                self.nir = Energy::from_wavenumber((3.0 * yag - wn) / 2.0);
                self.iir = Energy::from_wavenumber((yag + wn) / 2.0);
                self.mir = Energy::from_wavenumber((yag - wn) / 2.0);
            }
        }
    }
}

/// Detachment-channel energy set: one [`Energy`] per optical setup.
#[derive(Debug, Clone, PartialEq)]
pub struct DetachmentWavelength {
    constants: CalibrationConstants,
    standard: Energy,
    doubled: Energy,
    raman: Energy,
    irdfg: Energy,
    selected_mode: Option<DetachmentMode>,
}

impl DetachmentWavelength {
    /// New energy set with all setups unset and standard selected.
    pub fn new(constants: CalibrationConstants) -> Self {
        Self {
            constants,
            standard: Energy::zero(),
            doubled: Energy::zero(),
            raman: Energy::zero(),
            irdfg: Energy::zero(),
            selected_mode: Some(DetachmentMode::Standard),
        }
    }

    pub fn selected_mode(&self) -> Option<DetachmentMode> {
        self.selected_mode
    }

    pub fn set_selected_mode(&mut self, mode: Option<DetachmentMode>) {
        self.selected_mode = mode;
    }

    /// Energy of the selected setup (null energy when none selected).
    pub fn energy(&self) -> Energy {
        self.selected_mode
            .map_or(Energy::zero(), |mode| self.energy_of(mode))
    }

    pub fn energy_of(&self, mode: DetachmentMode) -> Energy {
        match mode {
            DetachmentMode::Standard => self.standard,
            DetachmentMode::Doubled => self.doubled,
            DetachmentMode::Raman => self.raman,
            DetachmentMode::Irdfg => self.irdfg,
        }
    }

    pub fn standard(&self) -> Energy {
        self.standard
    }

    pub fn doubled(&self) -> Energy {
        self.doubled
    }

    pub fn raman(&self) -> Energy {
        self.raman
    }

    pub fn irdfg(&self) -> Energy {
        self.irdfg
    }

    /// Reset every setup to the null energy.
    pub fn reset(&mut self) {
        self.standard = Energy::zero();
        self.doubled = Energy::zero();
        self.raman = Energy::zero();
        self.irdfg = Energy::zero();
    }

    /// Set one setup's wavelength (nm) and recompute all siblings.
    pub fn set_wavelength(&mut self, mode: DetachmentMode, nm: f64) {
        if nm == 0.0 {
            self.reset();
        } else {
            self.store(mode, Energy::from_wavelength(nm));
            self.convert_from(mode);
        }
    }

    /// Set one setup's wavenumber (cm⁻¹) and recompute all siblings.
    pub fn set_wavenumber(&mut self, mode: DetachmentMode, wn: f64) {
        if wn == 0.0 {
            self.reset();
        } else {
            self.store(mode, Energy::from_wavenumber(wn));
            self.convert_from(mode);
        }
    }

    fn store(&mut self, mode: DetachmentMode, energy: Energy) {
        match mode {
            DetachmentMode::Standard => self.standard = energy,
            DetachmentMode::Doubled => self.doubled = energy,
            DetachmentMode::Raman => self.raman = energy,
            DetachmentMode::Irdfg => self.irdfg = energy,
        }
    }

    /// Recompute siblings through the standard-setup wavenumber.
    fn convert_from(&mut self, mode: DetachmentMode) {
        let yag = self.constants.yag_wavenumber();
        let h2 = self.constants.h2_wavenumber();
        let wn = self.energy_of(mode).wavenumber();
        let standard = match mode {
            DetachmentMode::Standard => wn,
            DetachmentMode::Doubled => wn / 2.0,
            DetachmentMode::Raman => wn + h2,
            DetachmentMode::Irdfg => wn + yag,
        };
        if mode != DetachmentMode::Standard {
            self.standard = Energy::from_wavenumber(standard);
        }
        if mode != DetachmentMode::Doubled {
            self.doubled = Energy::from_wavenumber(2.0 * standard);
        }
        if mode != DetachmentMode::Raman {
            self.raman = Energy::from_wavenumber(standard - h2);
        }
        if mode != DetachmentMode::Irdfg {
            self.irdfg = Energy::from_wavenumber(standard - yag);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constants() -> CalibrationConstants {
        CalibrationConstants::default()
    }

    fn relative_error(a: f64, b: f64) -> f64 {
        ((a - b) / b).abs()
    }

    #[test]
    fn wavelength_wavenumber_stay_consistent() {
        let energy = Energy::from_wavelength(769.23);
        assert!(relative_error(energy.wavenumber(), 1e7 / 769.23) < 1e-12);
        assert!(Energy::from_wavelength(0.0).is_zero());
    }

    #[test]
    fn nir_request_maps_to_tunable_wavelength() {
        // 13000 cm-1 sits in the nIR band, so the tunable output is driven
        // there directly: 1e7 / 13000 = 769.23 nm.
        let mut wavelength = ExcitationWavelength::new(constants());
        let mode = wavelength.get_nir(EnergyInput::Wavenumber(13000.0));
        assert_eq!(mode, Some(ExcitationMode::Nir));
        assert!((wavelength.nir().wavelength() - 769.230769).abs() < 1e-5);
    }

    #[test]
    fn regime_classification_partitions_the_bands() {
        let cases = [
            (12000.0, Some(ExcitationMode::Nir)),
            (6000.0, Some(ExcitationMode::Iir)),
            (3000.0, Some(ExcitationMode::Mir)),
            (1000.0, Some(ExcitationMode::Fir)),
            (20000.0, None),
            (10000.0, None), // gap between iIR and nIR bands
            (500.0, None),
            (4500.0, None), // boundary values classify into no regime
            (2000.0, None),
        ];
        for (wn, expected) in cases {
            let mut wavelength = ExcitationWavelength::new(constants());
            assert_eq!(
                wavelength.get_nir(EnergyInput::Wavenumber(wn)),
                expected,
                "wn = {wn}"
            );
        }
    }

    #[test]
    fn zero_input_yields_no_mode() {
        let mut wavelength = ExcitationWavelength::new(constants());
        assert_eq!(wavelength.get_nir(EnergyInput::Wavelength(0.0)), None);
        assert!(wavelength.energy().is_zero());
    }

    #[test]
    fn excitation_round_trips_through_every_regime() {
        for wn in [11400.0, 12500.0, 14000.0] {
            round_trip_excitation(wn, ExcitationMode::Nir);
        }
        for wn in [4600.0, 6000.0, 7350.0] {
            round_trip_excitation(wn, ExcitationMode::Iir);
        }
        for wn in [2100.0, 3000.0, 4499.0] {
            round_trip_excitation(wn, ExcitationMode::Mir);
        }
        for wn in [700.0, 1500.0, 1999.0] {
            round_trip_excitation(wn, ExcitationMode::Fir);
        }
    }

    fn round_trip_excitation(wn: f64, expected_mode: ExcitationMode) {
        let mut wavelength = ExcitationWavelength::new(constants());
        let mode = wavelength.get_nir(EnergyInput::Wavenumber(wn));
        assert_eq!(mode, Some(expected_mode), "wn = {wn}");

        // Re-derive the requested regime from the tunable output alone.
        let mut back = ExcitationWavelength::new(constants());
        back.set_wavelength(ExcitationMode::Nir, wavelength.nir().wavelength());
        let recovered = back.energy_of(expected_mode).wavenumber();
        assert!(
            relative_error(recovered, wn) < 1e-6,
            "wn = {wn}: recovered {recovered}"
        );
    }

    #[test]
    fn excitation_siblings_follow_the_mixing_relations() {
        let yag = constants().yag_wavenumber();
        let mut wavelength = ExcitationWavelength::new(constants());
        wavelength.set_wavenumber(ExcitationMode::Nir, 12500.0);
        assert!((wavelength.iir().wavenumber() - (2.0 * yag - 12500.0)).abs() < 1e-9);
        assert!((wavelength.mir().wavenumber() - (12500.0 - yag)).abs() < 1e-9);
        assert!((wavelength.fir().wavenumber() - (3.0 * yag - 25000.0)).abs() < 1e-9);
    }

    #[test]
    fn setting_zero_resets_all_regimes() {
        let mut wavelength = ExcitationWavelength::new(constants());
        wavelength.set_wavenumber(ExcitationMode::Nir, 12500.0);
        assert!(!wavelength.iir().is_zero());
        wavelength.set_wavelength(ExcitationMode::Nir, 0.0);
        assert!(wavelength.nir().is_zero());
        assert!(wavelength.iir().is_zero());
        assert!(wavelength.mir().is_zero());
        assert!(wavelength.fir().is_zero());
    }

    #[test]
    fn detachment_relations_anchor_to_standard() {
        let c = constants();
        let mut wavelength = DetachmentWavelength::new(c);
        wavelength.set_wavenumber(DetachmentMode::Standard, 15000.0);
        assert!((wavelength.doubled().wavenumber() - 30000.0).abs() < 1e-9);
        assert!(
            (wavelength.raman().wavenumber() - (15000.0 - c.h2_wavenumber())).abs() < 1e-9
        );
        assert!(
            (wavelength.irdfg().wavenumber() - (15000.0 - c.yag_wavenumber())).abs() < 1e-9
        );
    }

    #[test]
    fn detachment_round_trips_from_each_setup() {
        let c = constants();
        for mode in [
            DetachmentMode::Standard,
            DetachmentMode::Doubled,
            DetachmentMode::Raman,
            DetachmentMode::Irdfg,
        ] {
            let mut forward = DetachmentWavelength::new(c);
            forward.set_wavenumber(DetachmentMode::Standard, 16000.0);
            let sibling = forward.energy_of(mode).wavenumber();

            let mut back = DetachmentWavelength::new(c);
            back.set_wavenumber(mode, sibling);
            assert!(
                relative_error(back.standard().wavenumber(), 16000.0) < 1e-6,
                "mode = {mode:?}"
            );
        }
    }
}
